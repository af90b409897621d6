//! ExamGate - CLI
//!
//! Command-line utility surface: model generation, descriptor extraction,
//! matching, enrollment, eligibility queries and a simulated exam session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use examgate::{
    evaluate, init_model, AttemptOutcome, BackendClient, CourseProgress, CourseStatus,
    EmbeddingModel, EnrollmentRequest, ExamGate, ExamSettings, Extraction, FaceDescriptor,
    FaceExtractor, GateError, GateResult, SchedulerAction, StillImage, VerifyBackend,
    VerifyVerdict, DESCRIPTOR_LEN,
};

#[derive(Parser)]
#[command(name = "examgate")]
#[command(version = examgate::VERSION)]
#[command(about = "ExamGate - Face verification and exam eligibility core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic embedding model (for demos and integration rigs)
    GenModel {
        /// Output weight file
        output: PathBuf,

        /// Deterministic seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Extract a face descriptor from a photo
    Extract {
        /// Photo path
        image: PathBuf,

        /// Embedding model weight file
        #[arg(short, long)]
        model: PathBuf,

        /// Print the descriptor as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Compare two photos with the descriptor matcher
    Match {
        image_a: PathBuf,
        image_b: PathBuf,

        /// Embedding model weight file
        #[arg(short, long)]
        model: PathBuf,

        /// Decision threshold (lower is stricter)
        #[arg(short, long, default_value_t = examgate::DEFAULT_MATCH_THRESHOLD)]
        threshold: f32,
    },

    /// Submit a registration-time descriptor to the account backend
    Enroll {
        /// Photo path
        image: PathBuf,

        /// Embedding model weight file
        #[arg(short, long)]
        model: PathBuf,

        /// Learner full name
        #[arg(long)]
        name: String,

        /// Learner email
        #[arg(long)]
        email: String,

        /// Backend base URL
        #[arg(long)]
        api: String,

        /// Bearer token
        #[arg(long)]
        token: Option<String>,
    },

    /// Query exam eligibility from the enrollment backend
    Eligibility {
        /// Backend base URL
        #[arg(long)]
        api: String,

        /// Bearer token
        #[arg(long)]
        token: Option<String>,
    },

    /// Walk through a simulated exam session (offline)
    Demo,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> GateResult<()> {
    match cli.command {
        Commands::GenModel { output, seed } => {
            EmbeddingModel::synthetic(seed).save(&output)?;
            println!("✅ Synthetic model written to {}", output.display());
            println!("   {} x {} f32 projection, seed {}", DESCRIPTOR_LEN, examgate::extractor::EMBED_INPUT, seed);
        }

        Commands::Extract { image, model, json } => {
            let extractor = FaceExtractor::new(init_model(&model).await?);

            match extract_from_file(&extractor, &image)? {
                None => println!("📭 No face detected in {}", image.display()),
                Some(descriptor) => {
                    if json {
                        println!("{}", serde_json::to_string(&descriptor)?);
                    } else {
                        let values = descriptor.as_slice();
                        println!("🧬 {}-float descriptor from {}", values.len(), image.display());
                        println!(
                            "   [{:.4}, {:.4}, {:.4}, ... {:.4}]",
                            values[0], values[1], values[2], values[DESCRIPTOR_LEN - 1]
                        );
                    }
                }
            }
        }

        Commands::Match { image_a, image_b, model, threshold } => {
            let extractor = FaceExtractor::new(init_model(&model).await?);

            let a = extract_from_file(&extractor, &image_a)?;
            let b = extract_from_file(&extractor, &image_b)?;

            match (a, b) {
                (Some(a), Some(b)) => {
                    let decision = examgate::decide(&a, &b, Some(threshold));
                    println!("Distance:  {:.4}", decision.distance);
                    println!("Threshold: {:.2}", decision.threshold);
                    if decision.is_match {
                        println!("✅ Same person");
                    } else {
                        println!("❌ Different person");
                    }
                }
                (None, _) => println!("📭 No face detected in {}", image_a.display()),
                (_, None) => println!("📭 No face detected in {}", image_b.display()),
            }
        }

        Commands::Enroll { image, model, name, email, api, token } => {
            let extractor = FaceExtractor::new(init_model(&model).await?);

            let descriptor = match extract_from_file(&extractor, &image)? {
                Some(d) => d,
                None => {
                    println!("📭 No face detected in {} - use a clearer photo", image.display());
                    return Ok(());
                }
            };

            let client = with_token(BackendClient::new(&api), token);
            client
                .register_enrollment(&EnrollmentRequest {
                    full_name: name.clone(),
                    email,
                    face_descriptor: descriptor,
                })
                .await?;
            println!("✅ Enrollment descriptor submitted for {}", name);
        }

        Commands::Eligibility { api, token } => {
            let client = with_token(BackendClient::new(&api), token);
            let outcome = client.evaluate_eligibility().await;

            if let Some(reason) = &outcome.degraded {
                println!("⚠️ Eligibility service unreachable ({}) - treating as not eligible", reason);
            }

            if outcome.result.courses.is_empty() {
                println!("📭 No courses on record");
            } else {
                println!("📚 Courses:");
                for course in &outcome.result.courses {
                    println!(
                        "   {:>3}%  {:<12}  {}",
                        course.completion_rate,
                        status_label(course.status),
                        course.course_name
                    );
                }
            }

            if outcome.result.exam_eligible {
                println!("✅ Eligible for the exam room");
            } else {
                println!("❌ Not eligible - every purchased course must be at 100%");
            }
        }

        Commands::Demo => demo().await?,
    }

    Ok(())
}

fn with_token(client: BackendClient, token: Option<String>) -> BackendClient {
    match token {
        Some(token) => client.with_bearer_token(token),
        None => client,
    }
}

fn status_label(status: CourseStatus) -> &'static str {
    match status {
        CourseStatus::NotPurchased => "not purchased",
        CourseStatus::Active => "active",
        CourseStatus::Completed => "completed",
    }
}

fn extract_from_file(
    extractor: &FaceExtractor,
    path: &Path,
) -> GateResult<Option<FaceDescriptor>> {
    let bytes = std::fs::read(path)?;
    match extractor.extract(&bytes)? {
        Extraction::Face(descriptor) => Ok(Some(descriptor)),
        Extraction::NotFound => Ok(None),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DEMO
// ═══════════════════════════════════════════════════════════════════════════

/// Offline stand-in for the exam backend: matches submissions against the
/// enrolled descriptor exactly the way the server does
struct LocalVerifier {
    enrolled: FaceDescriptor,
}

impl VerifyBackend for LocalVerifier {
    fn verify(
        &self,
        descriptor: &FaceDescriptor,
    ) -> impl std::future::Future<Output = GateResult<VerifyVerdict>> + Send {
        async move {
            let decision = examgate::decide(&self.enrolled, descriptor, None);
            Ok(VerifyVerdict {
                success: decision.is_match,
                message: Some(format!("distance {:.3}", decision.distance)),
            })
        }
    }
}

async fn demo() -> GateResult<()> {
    println!("🎓 ExamGate - simulated exam session");
    println!("{:-<52}", "");

    let model = Arc::new(EmbeddingModel::synthetic(42));

    // eligibility check
    let courses = vec![
        CourseProgress {
            course_id: "rust-101".into(),
            course_name: "Rust Basics".into(),
            completion_rate: 100,
            status: CourseStatus::Completed,
        },
        CourseProgress {
            course_id: "rust-201".into(),
            course_name: "Async Rust".into(),
            completion_rate: 100,
            status: CourseStatus::Active,
        },
        CourseProgress {
            course_id: "go-101".into(),
            course_name: "Go Basics".into(),
            completion_rate: 0,
            status: CourseStatus::NotPurchased,
        },
    ];
    let eligibility = evaluate(&courses);
    println!("📚 Courses:");
    for course in &eligibility.courses {
        println!(
            "   {:>3}%  {:<13}  {}",
            course.completion_rate,
            status_label(course.status),
            course.course_name
        );
    }
    println!("✅ Exam eligible: {}", eligibility.exam_eligible);
    println!();

    // registration-time enrollment
    let enroll_extractor = FaceExtractor::new(Arc::clone(&model));
    let enrolled = match enroll_extractor.extract(&sim::portrait(None))? {
        Extraction::Face(descriptor) => descriptor,
        Extraction::NotFound => {
            return Err(GateError::ImageError("demo portrait was not localized".into()));
        }
    };
    println!("🪪 Learner enrolled ({}-float descriptor)", DESCRIPTOR_LEN);

    // exam room
    let gate = ExamGate::new(
        "learner-demo",
        FaceExtractor::new(model),
        LocalVerifier { enrolled },
        ExamSettings::default(),
    )?;
    gate.begin(&eligibility)?;
    println!("🚪 Exam room entered: {:?}", gate.status());

    // entry verification: first capture has no face in frame
    if let AttemptOutcome::Failed(reason) = gate
        .verify_entry(StillImage::new(sim::empty_desk()))
        .await?
    {
        println!("❌ Entry capture: {}", reason.user_message());
    }

    // retry with the learner in frame
    gate.verify_entry(StillImage::new(sim::portrait(None))).await?;
    println!("✅ Identity verified - session {:?}", gate.status());

    // periodic re-verification
    if let Some(due) = gate.next_reverification_due() {
        println!("⏲️ Next re-verification due {}", due.format("%H:%M:%S"));
        if gate.poll(due) == SchedulerAction::Prompt {
            println!("🔔 Prompt fired - answers suspended until verified");
        }
    }
    let outcome = gate.reverify(StillImage::new(sim::portrait(Some(7)))).await?;
    println!("🔁 Re-verification: {:?} - session {:?}", outcome, gate.status());

    // submit and tear down
    gate.submit_exam()?;
    println!("📨 Exam submitted - session {:?}", gate.status());

    let attempts = gate.attempts();
    println!();
    println!("🧾 Audit trail ({} attempts):", attempts.len());
    for attempt in attempts {
        println!("   {}  {:?}", attempt.captured_at.format("%H:%M:%S"), attempt.result);
    }

    Ok(())
}

/// Synthetic capture frames for the offline demo
mod sim {
    use image::{DynamicImage, GrayImage, Luma};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::io::Cursor;

    fn encode(gray: GrayImage) -> Vec<u8> {
        let mut buf = Vec::new();
        // writing a PNG to an in-memory buffer cannot fail
        if DynamicImage::ImageLuma8(gray)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .is_err()
        {
            buf.clear();
        }
        buf
    }

    /// The demo learner: a mirror-symmetric high-contrast portrait, with
    /// optional sensor noise to simulate a fresh capture
    pub fn portrait(noise_seed: Option<u64>) -> Vec<u8> {
        let mut img = GrayImage::from_pixel(128, 128, Luma([204]));

        for y in 40..52 {
            for x in 32..44 {
                img.put_pixel(x, y, Luma([26]));
                img.put_pixel(127 - x, y, Luma([26]));
            }
        }
        for y in 88..96 {
            for x in 48..80 {
                img.put_pixel(x, y, Luma([26]));
            }
        }

        if let Some(seed) = noise_seed {
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..200 {
                let x = rng.gen_range(0..128);
                let y = rng.gen_range(0..128);
                let p = img.get_pixel(x, y).0[0];
                img.put_pixel(x, y, Luma([p.saturating_add(rng.gen_range(0..3))]));
            }
        }

        encode(img)
    }

    /// A capture with nobody in frame
    pub fn empty_desk() -> Vec<u8> {
        encode(GrayImage::from_pixel(128, 128, Luma([160])))
    }
}
