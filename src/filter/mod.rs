//! Typed query-refinement values declared by sources.
//!
//! Every source publishes a [`FilterList`] schema through
//! [`Source::declare_filters`](crate::source::Source::declare_filters). Hosts
//! render it, mutate the state, and hand it back to a search call, where it is
//! encoded into request parameters by [`FilterList::encode`].
//!
//! Options are always addressed by a stable `id` distinct from the display
//! `label`, so renamed or localized labels never change an encoded request.
//!
//! # Example
//!
//! ```
//! use sourcekit_core::filter::{FilterList, FilterOption, FilterValue};
//!
//! let mut filters = FilterList::new(vec![FilterValue::checkbox_group(
//!     "genre",
//!     "Genre",
//!     "genres",
//!     vec![FilterOption::new("28", "Action"), FilterOption::new("17", "Comedy")],
//! )]);
//! filters.set_checked("genre", "17", true).unwrap();
//! assert_eq!(filters.encode(), vec![("genres".to_string(), "17".to_string())]);
//! ```

mod encode;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while mutating or decoding a filter list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// No filter with this id in the schema.
    #[error("unknown filter '{filter}'")]
    UnknownFilter {
        /// The requested filter id.
        filter: String,
    },

    /// The filter exists but has no option with this id.
    #[error("filter '{filter}' has no option '{option}'")]
    UnknownOption {
        /// Filter id.
        filter: String,
        /// The requested option id.
        option: String,
    },

    /// The operation does not apply to this kind of filter.
    #[error("filter '{filter}' is a {actual} filter, not a {expected} filter")]
    KindMismatch {
        /// Filter id.
        filter: String,
        /// Kind the operation needs.
        expected: &'static str,
        /// Kind the filter has.
        actual: &'static str,
    },

    /// A sort direction value other than `asc` / `desc`.
    #[error("filter '{filter}' has invalid sort direction '{value}' (expected asc or desc)")]
    InvalidDirection {
        /// Filter id.
        filter: String,
        /// The rejected value.
        value: String,
    },
}

/// A selectable option: stable id plus display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOption {
    pub id: String,
    pub label: String,
}

impl FilterOption {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Builds an option list from `(id, label)` pairs.
#[must_use]
pub fn options(pairs: &[(&str, &str)]) -> Vec<FilterOption> {
    pairs
        .iter()
        .map(|(id, label)| FilterOption::new(*id, *label))
        .collect()
}

/// State of one member of a tri-state group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    #[default]
    Ignored,
    Included,
    Excluded,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    /// Wire value (`asc` / `desc`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(Self::Ascending),
            "desc" => Some(Self::Descending),
            _ => None,
        }
    }
}

/// How a tri-state group encodes excluded members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "param", rename_all = "snake_case")]
pub enum ExclusionPolicy {
    /// Excluded members are sent under this parallel parameter key.
    Parameter(String),
    /// The site has no exclusion syntax; excluded members are omitted.
    Unsupported,
}

/// Single choice among an ordered option set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectFilter {
    pub id: String,
    pub label: String,
    /// Request parameter key.
    pub param: String,
    pub options: Vec<FilterOption>,
    /// Index into `options`.
    pub selected: usize,
}

/// Sort field plus direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortFilter {
    pub id: String,
    pub label: String,
    /// Parameter key for the sort field.
    pub param: String,
    /// Parameter key for the direction; `None` when the site has no direction syntax.
    pub direction_param: Option<String>,
    pub options: Vec<FilterOption>,
    pub selected: usize,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriStateMember {
    pub option: FilterOption,
    pub state: TriState,
}

/// Members that are independently ignored, included, or excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriStateGroup {
    pub id: String,
    pub label: String,
    /// Parameter key for included members.
    pub param: String,
    pub exclusion: ExclusionPolicy,
    pub members: Vec<TriStateMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckboxMember {
    pub option: FilterOption,
    pub checked: bool,
}

/// Members that are independently checked or unchecked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckboxGroup {
    pub id: String,
    pub label: String,
    pub param: String,
    pub members: Vec<CheckboxMember>,
}

/// One declared filter with its current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterValue {
    Select(SelectFilter),
    Sort(SortFilter),
    TriStateGroup(TriStateGroup),
    CheckboxGroup(CheckboxGroup),
}

impl FilterValue {
    /// A select filter with the first option selected.
    #[must_use]
    pub fn select(
        id: impl Into<String>,
        label: impl Into<String>,
        param: impl Into<String>,
        options: Vec<FilterOption>,
    ) -> Self {
        Self::Select(SelectFilter {
            id: id.into(),
            label: label.into(),
            param: param.into(),
            options,
            selected: 0,
        })
    }

    /// A sort filter with the first field selected, descending.
    #[must_use]
    pub fn sort(
        id: impl Into<String>,
        label: impl Into<String>,
        param: impl Into<String>,
        direction_param: Option<&str>,
        options: Vec<FilterOption>,
    ) -> Self {
        Self::Sort(SortFilter {
            id: id.into(),
            label: label.into(),
            param: param.into(),
            direction_param: direction_param.map(str::to_string),
            options,
            selected: 0,
            direction: SortDirection::default(),
        })
    }

    /// A tri-state group with every member ignored.
    #[must_use]
    pub fn tri_state_group(
        id: impl Into<String>,
        label: impl Into<String>,
        param: impl Into<String>,
        exclusion: ExclusionPolicy,
        options: Vec<FilterOption>,
    ) -> Self {
        Self::TriStateGroup(TriStateGroup {
            id: id.into(),
            label: label.into(),
            param: param.into(),
            exclusion,
            members: options
                .into_iter()
                .map(|option| TriStateMember {
                    option,
                    state: TriState::Ignored,
                })
                .collect(),
        })
    }

    /// A checkbox group with every member unchecked.
    #[must_use]
    pub fn checkbox_group(
        id: impl Into<String>,
        label: impl Into<String>,
        param: impl Into<String>,
        options: Vec<FilterOption>,
    ) -> Self {
        Self::CheckboxGroup(CheckboxGroup {
            id: id.into(),
            label: label.into(),
            param: param.into(),
            members: options
                .into_iter()
                .map(|option| CheckboxMember {
                    option,
                    checked: false,
                })
                .collect(),
        })
    }

    /// Stable filter id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Select(f) => &f.id,
            Self::Sort(f) => &f.id,
            Self::TriStateGroup(f) => &f.id,
            Self::CheckboxGroup(f) => &f.id,
        }
    }

    /// Display label.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Select(f) => &f.label,
            Self::Sort(f) => &f.label,
            Self::TriStateGroup(f) => &f.label,
            Self::CheckboxGroup(f) => &f.label,
        }
    }

    /// Kind name used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Select(_) => "select",
            Self::Sort(_) => "sort",
            Self::TriStateGroup(_) => "tri-state",
            Self::CheckboxGroup(_) => "checkbox",
        }
    }
}

/// Ordered filter schema plus state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterList(Vec<FilterValue>);

impl FilterList {
    #[must_use]
    pub fn new(filters: Vec<FilterValue>) -> Self {
        Self(filters)
    }

    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterValue> {
        self.0.iter()
    }

    /// Looks up a filter by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&FilterValue> {
        self.0.iter().find(|f| f.id() == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut FilterValue, FilterError> {
        self.0
            .iter_mut()
            .find(|f| f.id() == id)
            .ok_or_else(|| FilterError::UnknownFilter {
                filter: id.to_string(),
            })
    }

    /// Selects an option of a select filter.
    ///
    /// # Errors
    ///
    /// Fails when the filter or option does not exist or the filter is not a select.
    pub fn select(&mut self, filter: &str, option: &str) -> Result<(), FilterError> {
        match self.get_mut(filter)? {
            FilterValue::Select(select) => {
                select.selected = option_index(filter, &select.options, option)?;
                Ok(())
            }
            other => Err(mismatch(filter, "select", other)),
        }
    }

    /// Selects the field and direction of a sort filter.
    ///
    /// # Errors
    ///
    /// Fails when the filter or option does not exist or the filter is not a sort.
    pub fn set_sort(
        &mut self,
        filter: &str,
        option: &str,
        direction: SortDirection,
    ) -> Result<(), FilterError> {
        match self.get_mut(filter)? {
            FilterValue::Sort(sort) => {
                sort.selected = option_index(filter, &sort.options, option)?;
                sort.direction = direction;
                Ok(())
            }
            other => Err(mismatch(filter, "sort", other)),
        }
    }

    /// Sets one member of a tri-state group.
    ///
    /// # Errors
    ///
    /// Fails when the filter or member does not exist or the filter is not a tri-state group.
    pub fn set_tri_state(
        &mut self,
        filter: &str,
        option: &str,
        state: TriState,
    ) -> Result<(), FilterError> {
        match self.get_mut(filter)? {
            FilterValue::TriStateGroup(group) => {
                let member = group
                    .members
                    .iter_mut()
                    .find(|m| m.option.id == option)
                    .ok_or_else(|| unknown_option(filter, option))?;
                member.state = state;
                Ok(())
            }
            other => Err(mismatch(filter, "tri-state", other)),
        }
    }

    /// Checks or unchecks one member of a checkbox group.
    ///
    /// # Errors
    ///
    /// Fails when the filter or member does not exist or the filter is not a checkbox group.
    pub fn set_checked(
        &mut self,
        filter: &str,
        option: &str,
        checked: bool,
    ) -> Result<(), FilterError> {
        match self.get_mut(filter)? {
            FilterValue::CheckboxGroup(group) => {
                let member = group
                    .members
                    .iter_mut()
                    .find(|m| m.option.id == option)
                    .ok_or_else(|| unknown_option(filter, option))?;
                member.checked = checked;
                Ok(())
            }
            other => Err(mismatch(filter, "checkbox", other)),
        }
    }

    /// Returns true when no filter deviates from its declared default state.
    #[must_use]
    pub fn is_default_state(&self) -> bool {
        self.0.iter().all(|filter| match filter {
            FilterValue::Select(f) => f.selected == 0,
            FilterValue::Sort(f) => f.selected == 0 && f.direction == SortDirection::default(),
            FilterValue::TriStateGroup(f) => f.members.iter().all(|m| m.state == TriState::Ignored),
            FilterValue::CheckboxGroup(f) => f.members.iter().all(|m| !m.checked),
        })
    }
}

impl<'a> IntoIterator for &'a FilterList {
    type Item = &'a FilterValue;
    type IntoIter = std::slice::Iter<'a, FilterValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn option_index(filter: &str, options: &[FilterOption], option: &str) -> Result<usize, FilterError> {
    options
        .iter()
        .position(|o| o.id == option)
        .ok_or_else(|| unknown_option(filter, option))
}

fn unknown_option(filter: &str, option: &str) -> FilterError {
    FilterError::UnknownOption {
        filter: filter.to_string(),
        option: option.to_string(),
    }
}

fn mismatch(filter: &str, expected: &'static str, actual: &FilterValue) -> FilterError {
    FilterError::KindMismatch {
        filter: filter.to_string(),
        expected,
        actual: actual.kind_name(),
    }
}
