//! Compile-time registry of environment data types.
//!
//! Each entry is a `(name, toml_content)` pair embedded via `include_str!`.
//! A data type's parameter list is the closed set consulted when deciding
//! whether a parameter is summed or averaged.

use civic_map_environment_data_models::{DataType, DataTypeDefinition};

/// Number of registered data types. Enforced by a test.
#[cfg(test)]
const EXPECTED_DATA_TYPE_COUNT: usize = 2;

/// Embedded TOML data type definitions.
const DATA_TYPE_TOMLS: &[(&str, &str)] = &[
    ("aq", include_str!("../data_types/aq.toml")),
    ("wo", include_str!("../data_types/wo.toml")),
];

/// Returns all registered data type definitions.
///
/// # Panics
///
/// Panics if any embedded TOML file fails to parse. Since these are
/// compile-time constants, parse failures indicate a development error
/// and are caught by the registry tests.
#[must_use]
pub fn all_data_types() -> Vec<DataTypeDefinition> {
    DATA_TYPE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse data type '{name}': {e}"))
        })
        .collect()
}

/// Returns the definition for one data type, if registered.
#[must_use]
pub fn data_type_definition(data_type: DataType) -> Option<DataTypeDefinition> {
    all_data_types().into_iter().find(|d| d.code == data_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn loads_all_data_types() {
        let data_types = all_data_types();
        assert_eq!(
            data_types.len(),
            EXPECTED_DATA_TYPE_COUNT,
            "Expected {EXPECTED_DATA_TYPE_COUNT} data types, found {}. \
             Update EXPECTED_DATA_TYPE_COUNT after adding/removing data types.",
            data_types.len()
        );
    }

    #[test]
    fn codes_and_parameter_names_are_unique() {
        let mut codes = BTreeSet::new();
        for definition in all_data_types() {
            assert!(codes.insert(definition.code), "Duplicate code {}", definition.code);
            let mut names = BTreeSet::new();
            for parameter in &definition.parameters {
                assert!(
                    names.insert(&parameter.name),
                    "Duplicate parameter {} in {}",
                    parameter.name,
                    definition.code
                );
            }
        }
    }

    #[test]
    fn precipitation_is_the_only_cumulative_parameter() {
        let cumulative: Vec<String> = all_data_types()
            .iter()
            .flat_map(|d| d.parameters.iter())
            .filter(|p| p.cumulative)
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(cumulative, vec!["PRA_PT1H_ACC".to_string()]);

        let wo = data_type_definition(DataType::WeatherObservation).unwrap();
        assert!(wo.is_cumulative("PRA_PT1H_ACC"));
        assert!(!wo.is_cumulative("TA_PT1H_AVG"));
    }
}
