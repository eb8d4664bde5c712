use crate::error::{EngineError, EngineResult};
use crate::grade_scale::GradeScale;
use crate::results::ResultStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A published result joined with the course and exam-type data that
/// weights it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedEntry {
    pub result_id: String,
    pub semester_id: String,
    pub course_id: String,
    pub credits: f64,
    pub weightage: f64,
    pub percentage: Option<f64>,
    pub result_status: ResultStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGrade {
    pub course_id: String,
    pub credits: f64,
    pub course_percentage: f64,
    pub grade_code: String,
    pub grade_points: f64,
    pub weighted_grade_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterPerformance {
    pub student_id: String,
    pub semester_id: String,
    pub sgpa: f64,
    pub total_credits: f64,
    pub earned_credits: f64,
    pub passed_all: bool,
    pub course_grades: Vec<CourseGrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativePerformance {
    pub student_id: String,
    pub cgpa: f64,
    pub total_credits: f64,
    pub earned_credits: f64,
    pub semesters: Vec<SemesterPerformance>,
}

/// Half-up rounding to `decimals` places: `Int(f*x + 0.5) / f`.
pub fn round_half_up(x: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    ((x * factor) + 0.5).floor() / factor
}

fn course_percentage(entries: &[&GradedEntry]) -> f64 {
    // Absent results count as 0%.
    let pct = |e: &GradedEntry| e.percentage.unwrap_or(0.0);
    let weight_sum: f64 = entries.iter().map(|e| e.weightage).sum();
    let value = if weight_sum > 0.0 {
        entries.iter().map(|e| pct(e) * e.weightage).sum::<f64>() / weight_sum
    } else {
        // All weights zero: fall back to an unweighted mean.
        entries.iter().map(|e| pct(e)).sum::<f64>() / entries.len() as f64
    };
    value.clamp(0.0, 100.0)
}

fn grade_courses(entries: &[&GradedEntry], scale: &GradeScale) -> EngineResult<Vec<CourseGrade>> {
    let mut by_course: BTreeMap<&str, Vec<&GradedEntry>> = BTreeMap::new();
    for e in entries {
        if !e.credits.is_finite() || e.credits < 0.0 {
            return Err(EngineError::validation(
                "credits",
                format!("course {} has invalid credits {}", e.course_id, e.credits),
            ));
        }
        if !e.weightage.is_finite() || e.weightage < 0.0 {
            return Err(EngineError::validation(
                "weightage",
                format!("result {} has invalid weightage {}", e.result_id, e.weightage),
            ));
        }
        by_course.entry(e.course_id.as_str()).or_default().push(e);
    }

    let mut out = Vec::with_capacity(by_course.len());
    for (course_id, rows) in by_course {
        let credits = rows[0].credits;
        let course_percentage = course_percentage(&rows);
        let band = scale.resolve(course_percentage)?;
        out.push(CourseGrade {
            course_id: course_id.to_string(),
            credits,
            course_percentage,
            grade_code: band.code.clone(),
            grade_points: band.grade_points,
            weighted_grade_points: band.grade_points * credits,
        });
    }
    Ok(out)
}

fn credit_weighted(grades: &[CourseGrade]) -> (f64, f64, f64) {
    let total_credits: f64 = grades.iter().map(|g| g.credits).sum();
    let earned_credits: f64 = grades
        .iter()
        .filter(|g| g.grade_points > 0.0)
        .map(|g| g.credits)
        .sum();
    let weighted: f64 = grades.iter().map(|g| g.weighted_grade_points).sum();
    let gpa = if total_credits > 0.0 {
        weighted / total_credits
    } else {
        0.0
    };
    (gpa, total_credits, earned_credits)
}

/// SGPA over the given published entries of one semester. Entries from other
/// semesters are ignored.
pub fn compute_sgpa(
    student_id: &str,
    semester_id: &str,
    entries: &[GradedEntry],
    scale: &GradeScale,
    decimals: u32,
) -> EngineResult<SemesterPerformance> {
    let in_semester: Vec<&GradedEntry> = entries
        .iter()
        .filter(|e| e.semester_id == semester_id)
        .collect();
    let course_grades = grade_courses(&in_semester, scale)?;
    let (sgpa, total_credits, earned_credits) = credit_weighted(&course_grades);
    Ok(SemesterPerformance {
        student_id: student_id.to_string(),
        semester_id: semester_id.to_string(),
        sgpa: round_half_up(sgpa, decimals),
        total_credits,
        earned_credits,
        // A semester with no graded course has not been passed.
        passed_all: !course_grades.is_empty() && course_grades.iter().all(|g| g.grade_points > 0.0),
        course_grades,
    })
}

/// CGPA weights every course grade of every semester by its credits; it is
/// not a mean of the semester SGPAs.
pub fn compute_cgpa(
    student_id: &str,
    entries: &[GradedEntry],
    scale: &GradeScale,
    decimals: u32,
) -> EngineResult<CumulativePerformance> {
    let mut semester_ids: Vec<&str> = entries.iter().map(|e| e.semester_id.as_str()).collect();
    semester_ids.sort_unstable();
    semester_ids.dedup();

    let mut semesters = Vec::with_capacity(semester_ids.len());
    for semester_id in semester_ids {
        semesters.push(compute_sgpa(student_id, semester_id, entries, scale, decimals)?);
    }
    let all_grades: Vec<CourseGrade> = semesters
        .iter()
        .flat_map(|s| s.course_grades.iter().cloned())
        .collect();
    let (cgpa, total_credits, earned_credits) = credit_weighted(&all_grades);
    Ok(CumulativePerformance {
        student_id: student_id.to_string(),
        cgpa: round_half_up(cgpa, decimals),
        total_credits,
        earned_credits,
        semesters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grade_scale::GradeBand;

    fn scale() -> GradeScale {
        let band = |code: &str, lo: f64, hi: f64, gp: f64| GradeBand {
            code: code.into(),
            name: code.into(),
            lower_limit: lo,
            upper_limit: hi,
            grade_points: gp,
        };
        GradeScale::new(vec![
            band("O", 90.0, 100.0, 10.0),
            band("A+", 80.0, 89.99, 9.0),
            band("A", 70.0, 79.99, 8.0),
            band("B", 50.0, 69.99, 6.0),
            band("C", 40.0, 49.99, 5.0),
            band("F", 0.0, 39.99, 0.0),
        ])
        .expect("scale")
    }

    fn entry(sem: &str, course: &str, credits: f64, weight: f64, pct: Option<f64>) -> GradedEntry {
        GradedEntry {
            result_id: format!("{}-{}-{}", sem, course, weight),
            semester_id: sem.into(),
            course_id: course.into(),
            credits,
            weightage: weight,
            percentage: pct,
            result_status: ResultStatus::Pass,
        }
    }

    #[test]
    fn sgpa_is_credit_weighted_and_rounded() {
        let entries = vec![
            entry("s1", "MATH", 4.0, 50.0, Some(80.0)),
            entry("s1", "MATH", 4.0, 50.0, Some(90.0)),
            entry("s1", "PHY", 3.0, 100.0, Some(45.0)),
        ];
        let perf = compute_sgpa("stu", "s1", &entries, &scale(), 2).expect("sgpa");
        assert_eq!(perf.course_grades.len(), 2);
        let math = &perf.course_grades[0];
        assert_eq!(math.course_id, "MATH");
        assert_eq!(math.course_percentage, 85.0);
        assert_eq!(math.grade_points, 9.0);
        assert_eq!(math.weighted_grade_points, 36.0);
        // (36 + 15) / 7 = 7.2857...
        assert_eq!(perf.sgpa, 7.29);
        assert_eq!(perf.total_credits, 7.0);
        assert!(perf.passed_all);
    }

    #[test]
    fn failing_course_clears_passed_all_and_earned_credits() {
        let entries = vec![
            entry("s1", "MATH", 4.0, 100.0, Some(30.0)),
            entry("s1", "PHY", 3.0, 100.0, Some(75.0)),
        ];
        let perf = compute_sgpa("stu", "s1", &entries, &scale(), 2).expect("sgpa");
        assert!(!perf.passed_all);
        assert_eq!(perf.earned_credits, 3.0);
        assert_eq!(perf.sgpa, round_half_up(24.0 / 7.0, 2));
    }

    #[test]
    fn unequal_weightage_and_absent_components() {
        let entries = vec![
            entry("s1", "CHEM", 2.0, 30.0, Some(100.0)),
            entry("s1", "CHEM", 2.0, 70.0, None),
        ];
        let perf = compute_sgpa("stu", "s1", &entries, &scale(), 2).expect("sgpa");
        assert_eq!(perf.course_grades[0].course_percentage, 30.0);
        assert_eq!(perf.course_grades[0].grade_code, "F");
    }

    #[test]
    fn empty_semester_has_zero_sgpa_and_is_not_passed() {
        let perf = compute_sgpa("stu", "s9", &[], &scale(), 2).expect("sgpa");
        assert_eq!(perf.sgpa, 0.0);
        assert!(!perf.passed_all);
    }

    #[test]
    fn cgpa_weights_by_credits_not_semester_count() {
        let entries = vec![
            entry("s1", "A", 1.0, 100.0, Some(95.0)),
            entry("s2", "B", 4.0, 100.0, Some(55.0)),
        ];
        let cum = compute_cgpa("stu", &entries, &scale(), 2).expect("cgpa");
        assert_eq!(cum.semesters.len(), 2);
        assert_eq!(cum.semesters[0].sgpa, 10.0);
        assert_eq!(cum.semesters[1].sgpa, 6.0);
        // (10*1 + 6*4) / 5 = 6.8, where a plain mean of SGPAs would give 8.0
        assert_eq!(cum.cgpa, 6.8);
        assert_eq!(cum.total_credits, 5.0);
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_half_up(7.2857, 2), 7.29);
        assert_eq!(round_half_up(8.125, 2), 8.13);
        assert_eq!(round_half_up(7.2849, 2), 7.28);
        assert_eq!(round_half_up(0.0, 2), 0.0);
    }
}
