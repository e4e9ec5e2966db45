use tripwire_common::Sample;

use super::definition::AlarmDefinition;

/// True when `sample` belongs to `definition`: same counter, and every
/// predicate key present on the sample with an accepted value.
pub fn matches(definition: &AlarmDefinition, sample: &Sample) -> bool {
    if sample.counter_name != definition.counter_name {
        return false;
    }
    definition
        .matching_metadata
        .iter()
        .all(|(key, expected)| match sample.attribute(key) {
            Some(actual) => expected.accepts(&actual),
            None => false,
        })
}
