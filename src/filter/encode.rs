//! Filter state ⇄ request parameter encoding.

use tracing::debug;

use super::{
    CheckboxGroup, ExclusionPolicy, FilterError, FilterList, FilterValue, SelectFilter,
    SortDirection, SortFilter, TriState, TriStateGroup,
};

impl FilterList {
    /// Encodes the current state into `(key, value)` request parameters.
    ///
    /// Values are always option ids. Pairs follow schema order; sites treat
    /// them as order-independent.
    #[must_use]
    pub fn encode(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        for filter in self {
            match filter {
                FilterValue::Select(select) => encode_select(select, &mut params),
                FilterValue::Sort(sort) => encode_sort(sort, &mut params),
                FilterValue::TriStateGroup(group) => encode_tri_state(group, &mut params),
                FilterValue::CheckboxGroup(group) => encode_checkboxes(group, &mut params),
            }
        }
        params
    }

    /// Replaces the state of every filter with the state encoded in `params`.
    ///
    /// Keys not owned by any filter (page numbers, the query) are ignored.
    /// A filter whose keys are absent returns to its "nothing selected" state.
    /// On error the list is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::UnknownOption`] when an owned key carries a value
    /// that is not an option id, and [`FilterError::InvalidDirection`] for a
    /// direction other than `asc` / `desc`.
    pub fn apply_params<K, V>(&mut self, params: &[(K, V)]) -> Result<(), FilterError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut staged = self.0.clone();
        for filter in &mut staged {
            match filter {
                FilterValue::Select(select) => {
                    let values = values_for(params, &select.param);
                    select.selected = match values.last() {
                        Some(value) => index_of(&select.id, &select.options, value)?,
                        None => select
                            .options
                            .iter()
                            .position(|o| o.id.is_empty())
                            .unwrap_or(0),
                    };
                }
                FilterValue::Sort(sort) => {
                    if let Some(value) = values_for(params, &sort.param).last() {
                        sort.selected = index_of(&sort.id, &sort.options, value)?;
                    } else {
                        sort.selected = 0;
                    }
                    sort.direction = match sort.direction_param.as_deref() {
                        Some(key) => match values_for(params, key).last() {
                            Some(value) => SortDirection::parse(value).ok_or_else(|| {
                                FilterError::InvalidDirection {
                                    filter: sort.id.clone(),
                                    value: (*value).to_string(),
                                }
                            })?,
                            None => SortDirection::default(),
                        },
                        None => SortDirection::default(),
                    };
                }
                FilterValue::TriStateGroup(group) => {
                    let included = values_for(params, &group.param);
                    let excluded = match &group.exclusion {
                        ExclusionPolicy::Parameter(key) => values_for(params, key),
                        ExclusionPolicy::Unsupported => Vec::new(),
                    };
                    check_members(&group.id, &group.members, |m| &m.option.id, &included)?;
                    check_members(&group.id, &group.members, |m| &m.option.id, &excluded)?;
                    for member in &mut group.members {
                        let id = member.option.id.as_str();
                        member.state = if included.contains(&id) {
                            TriState::Included
                        } else if excluded.contains(&id) {
                            TriState::Excluded
                        } else {
                            TriState::Ignored
                        };
                    }
                }
                FilterValue::CheckboxGroup(group) => {
                    let checked = values_for(params, &group.param);
                    check_members(&group.id, &group.members, |m| &m.option.id, &checked)?;
                    for member in &mut group.members {
                        member.checked = checked.contains(&member.option.id.as_str());
                    }
                }
            }
        }
        self.0 = staged;
        Ok(())
    }
}

fn encode_select(select: &SelectFilter, params: &mut Vec<(String, String)>) {
    if let Some(option) = select.options.get(select.selected)
        && !option.id.is_empty()
    {
        params.push((select.param.clone(), option.id.clone()));
    }
}

fn encode_sort(sort: &SortFilter, params: &mut Vec<(String, String)>) {
    let Some(option) = sort.options.get(sort.selected) else {
        return;
    };
    params.push((sort.param.clone(), option.id.clone()));
    if let Some(key) = &sort.direction_param {
        params.push((key.clone(), sort.direction.as_str().to_string()));
    }
}

fn encode_tri_state(group: &TriStateGroup, params: &mut Vec<(String, String)>) {
    for member in &group.members {
        match (member.state, &group.exclusion) {
            (TriState::Included, _) => {
                params.push((group.param.clone(), member.option.id.clone()));
            }
            (TriState::Excluded, ExclusionPolicy::Parameter(key)) => {
                params.push((key.clone(), member.option.id.clone()));
            }
            (TriState::Excluded, ExclusionPolicy::Unsupported) => {
                debug!(
                    filter = %group.id,
                    option = %member.option.id,
                    "Source has no exclusion syntax, excluded member omitted"
                );
            }
            (TriState::Ignored, _) => {}
        }
    }
}

fn encode_checkboxes(group: &CheckboxGroup, params: &mut Vec<(String, String)>) {
    params.extend(
        group
            .members
            .iter()
            .filter(|m| m.checked)
            .map(|m| (group.param.clone(), m.option.id.clone())),
    );
}

fn index_of(filter: &str, options: &[super::FilterOption], value: &str) -> Result<usize, FilterError> {
    options
        .iter()
        .position(|o| o.id == value)
        .ok_or_else(|| FilterError::UnknownOption {
            filter: filter.to_string(),
            option: value.to_string(),
        })
}

fn values_for<'p, K, V>(params: &'p [(K, V)], key: &str) -> Vec<&'p str>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    params
        .iter()
        .filter(|(k, _)| k.as_ref() == key)
        .map(|(_, v)| v.as_ref())
        .collect()
}

fn check_members<M>(
    filter: &str,
    members: &[M],
    id_of: impl Fn(&M) -> &String,
    values: &[&str],
) -> Result<(), FilterError> {
    match values
        .iter()
        .find(|value| !members.iter().any(|m| id_of(m) == **value))
    {
        Some(value) => Err(FilterError::UnknownOption {
            filter: filter.to_string(),
            option: (*value).to_string(),
        }),
        None => Ok(()),
    }
}
