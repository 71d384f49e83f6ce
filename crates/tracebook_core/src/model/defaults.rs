//! Canned field templates for common definitions.

use crate::model::definition::WorkItemDefinition;
use crate::model::field::{Field, FieldValue};

pub const FEATURE: &str = "Feature";
pub const REQUIREMENT: &str = "Requirement";
pub const TEST_CASE: &str = "Test Case";

const ENGINEERS: [&str; 3] = [
    "Electrical Engineer",
    "Software Engineer",
    "Mechanical Engineer",
];

const FEATURE_TYPES: [&str; 4] = [
    "Electrical Feature",
    "Mechanical Feature",
    "Firmware Feature",
    "Software Feature",
];

fn choice(name: &str, options: &[&str]) -> Field {
    let options: Vec<String> = options.iter().map(|option| option.to_string()).collect();
    let default = options.first().cloned().unwrap_or_default();
    Field::from_value(
        name,
        FieldValue::SingleChoice {
            options,
            current: default.clone(),
            default,
        },
    )
}

pub fn feature_fields() -> Vec<Field> {
    vec![
        choice("Feature Type", &FEATURE_TYPES),
        Field::long_text("Description", ""),
        Field::plain_text("Production Cost Estimate", ""),
    ]
}

pub fn requirement_fields() -> Vec<Field> {
    vec![
        Field::long_text("Requirement", ""),
        Field::long_text("Rationale", ""),
        choice("Assigned To", &ENGINEERS),
    ]
}

pub fn test_case_fields() -> Vec<Field> {
    vec![
        Field::long_text("Preconditions", ""),
        Field::long_text("Procedure", ""),
        Field::long_text("Pass Conditions", ""),
    ]
}

/// Feature, Requirement and Test Case definitions with their public fields
/// and the Feature -> Requirement -> Test Case downstream chain.
pub fn default_definitions() -> [WorkItemDefinition; 3] {
    let mut feature = WorkItemDefinition::new(FEATURE);
    let mut requirement = WorkItemDefinition::new(REQUIREMENT);
    let mut test_case = WorkItemDefinition::new(TEST_CASE);

    feature.add_public_fields(feature_fields());
    requirement.add_public_fields(requirement_fields());
    test_case.add_public_fields(test_case_fields());

    feature.add_downstream_rule(&mut requirement, true);
    requirement.add_downstream_rule(&mut test_case, true);
    [feature, requirement, test_case]
}

#[cfg(test)]
mod tests {
    use super::default_definitions;

    #[test]
    fn chain_runs_feature_to_test_case() {
        let [feature, requirement, test_case] = default_definitions();
        assert!(feature.allows_downstream(&requirement));
        assert!(requirement.allows_downstream(&test_case));
        assert!(!feature.allows_downstream(&test_case));
        assert_eq!(
            requirement
                .entity()
                .public_field("Assigned To")
                .unwrap()
                .current()
                .unwrap(),
            "Electrical Engineer"
        );
    }
}
