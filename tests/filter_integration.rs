//! Filter schemas of every shipped adapter survive an encode / apply round trip.

use std::collections::HashSet;
use std::sync::Arc;

use sourcekit_core::filter::{ExclusionPolicy, FilterList, FilterValue, TriState};
use sourcekit_core::source::build_default_source_registry;

mod support;
use support::scripted::{ScriptedTransport, unlimited_runtime};

/// Moves every filter away from its default state in a way the site can express.
fn touch(filter: FilterValue) -> FilterValue {
    match filter {
        FilterValue::Select(mut select) => {
            select.selected = select.options.len().saturating_sub(1);
            FilterValue::Select(select)
        }
        FilterValue::Sort(mut sort) => {
            sort.selected = sort.options.len().saturating_sub(1);
            FilterValue::Sort(sort)
        }
        FilterValue::TriStateGroup(mut group) => {
            if let Some(first) = group.members.first_mut() {
                first.state = TriState::Included;
            }
            if matches!(group.exclusion, ExclusionPolicy::Parameter(_))
                && let Some(second) = group.members.get_mut(1)
            {
                second.state = TriState::Excluded;
            }
            FilterValue::TriStateGroup(group)
        }
        FilterValue::CheckboxGroup(mut group) => {
            for member in group.members.iter_mut().step_by(2) {
                member.checked = true;
            }
            FilterValue::CheckboxGroup(group)
        }
    }
}

#[test]
fn test_every_schema_round_trips() {
    let transport = ScriptedTransport::new();
    let runtime = unlimited_runtime(Arc::clone(&transport));
    let registry = build_default_source_registry(&runtime);

    for source in registry.iter() {
        let defaults = source.declare_filters();
        let mut restored = source.declare_filters();
        restored.apply_params(&defaults.encode()).unwrap();
        assert_eq!(restored, defaults, "{} default state", source.id());

        let touched = FilterList::new(defaults.iter().cloned().map(touch).collect());
        let mut restored = source.declare_filters();
        restored.apply_params(&touched.encode()).unwrap();
        assert_eq!(restored, touched, "{} modified state", source.id());
    }

    assert_eq!(transport.request_count(), 0, "schemas never touch the network");
}

#[test]
fn test_filter_and_option_ids_are_unique_per_source() {
    let runtime = unlimited_runtime(ScriptedTransport::new());
    let registry = build_default_source_registry(&runtime);

    for source in registry.iter() {
        let filters = source.declare_filters();
        let mut filter_ids = HashSet::new();
        for filter in filters.iter() {
            assert!(filter_ids.insert(filter.id().to_string()), "{}: duplicate filter {}", source.id(), filter.id());
            let option_ids: Vec<&str> = match filter {
                FilterValue::Select(select) => select.options.iter().map(|o| o.id.as_str()).collect(),
                FilterValue::Sort(sort) => sort.options.iter().map(|o| o.id.as_str()).collect(),
                FilterValue::TriStateGroup(group) => {
                    group.members.iter().map(|m| m.option.id.as_str()).collect()
                }
                FilterValue::CheckboxGroup(group) => {
                    group.members.iter().map(|m| m.option.id.as_str()).collect()
                }
            };
            let unique: HashSet<&str> = option_ids.iter().copied().collect();
            assert_eq!(unique.len(), option_ids.len(), "{}: duplicate option in {}", source.id(), filter.id());
        }
    }
}

#[test]
fn test_unknown_option_is_rejected() {
    let runtime = unlimited_runtime(ScriptedTransport::new());
    let registry = build_default_source_registry(&runtime);
    let desu = registry.get("desu").unwrap();

    let mut filters = desu.declare_filters();
    let error = filters
        .apply_params(&[("order", "no-such-order")])
        .unwrap_err();
    assert!(error.to_string().contains("no-such-order"));
}
