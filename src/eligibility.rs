//! ExamGate - Eligibility Evaluator
//!
//! Pure gate over course-completion state. Recomputed on every navigation
//! to the exam entry point - completion can change between checks, so
//! nothing here is cached.

use serde::{Deserialize, Serialize};

/// Enrollment status of one course, as reported by the progress backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    NotPurchased,
    Active,
    Completed,
}

impl CourseStatus {
    /// Purchased courses are the ones that can block eligibility
    pub fn is_purchased(&self) -> bool {
        matches!(self, CourseStatus::Active | CourseStatus::Completed)
    }
}

/// Read-only per-course completion record from the enrollment backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseProgress {
    #[serde(rename = "courseId")]
    pub course_id: String,
    #[serde(rename = "courseName")]
    pub course_name: String,
    /// Percent complete, 0-100
    #[serde(rename = "completionRate")]
    pub completion_rate: u8,
    pub status: CourseStatus,
}

/// Derived eligibility verdict; never stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityResult {
    #[serde(rename = "examEligible")]
    pub exam_eligible: bool,
    pub courses: Vec<CourseProgress>,
}

/// Evaluate exam eligibility: every purchased course must be fully complete,
/// and there must be at least one purchased course. `not_purchased` rows are
/// informational only.
pub fn evaluate(courses: &[CourseProgress]) -> EligibilityResult {
    let mut purchased = courses.iter().filter(|c| c.status.is_purchased());
    let any_purchased = purchased.clone().next().is_some();
    let exam_eligible = any_purchased && purchased.all(|c| c.completion_rate == 100);

    EligibilityResult {
        exam_eligible,
        courses: courses.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(status: CourseStatus, completion_rate: u8) -> CourseProgress {
        CourseProgress {
            course_id: "c-1".into(),
            course_name: "Course".into(),
            completion_rate,
            status,
        }
    }

    #[test]
    fn test_no_courses_is_ineligible() {
        assert!(!evaluate(&[]).exam_eligible);
    }

    #[test]
    fn test_single_completed_course_is_eligible() {
        let result = evaluate(&[course(CourseStatus::Completed, 100)]);
        assert!(result.exam_eligible);
    }

    #[test]
    fn test_partial_active_course_blocks() {
        assert!(!evaluate(&[course(CourseStatus::Active, 80)]).exam_eligible);
    }

    #[test]
    fn test_not_purchased_courses_are_ignored() {
        let result = evaluate(&[
            course(CourseStatus::NotPurchased, 0),
            course(CourseStatus::Completed, 100),
        ]);
        assert!(result.exam_eligible);
    }

    #[test]
    fn test_only_not_purchased_courses_is_ineligible() {
        assert!(!evaluate(&[course(CourseStatus::NotPurchased, 0)]).exam_eligible);
    }

    #[test]
    fn test_every_purchased_course_must_be_complete() {
        let blocked = evaluate(&[
            course(CourseStatus::Completed, 100),
            course(CourseStatus::Active, 99),
        ]);
        assert!(!blocked.exam_eligible);

        let ready = evaluate(&[
            course(CourseStatus::Completed, 100),
            course(CourseStatus::Active, 100),
        ]);
        assert!(ready.exam_eligible);
    }

    #[test]
    fn test_wire_field_names() {
        let json = r#"{
            "courseId": "rust-101",
            "courseName": "Rust Basics",
            "completionRate": 100,
            "status": "completed"
        }"#;
        let progress: CourseProgress = serde_json::from_str(json).unwrap();
        assert_eq!(progress.status, CourseStatus::Completed);
        assert_eq!(progress.completion_rate, 100);

        let result = evaluate(&[progress]);
        let out = serde_json::to_string(&result).unwrap();
        assert!(out.contains("\"examEligible\":true"));
    }
}
