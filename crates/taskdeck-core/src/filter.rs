use std::fmt;
use std::str::FromStr;

use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};

use crate::error::ValidationError;
use crate::task::TaskStatus;

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
  #[default]
  All,
  Todo,
  Running,
  Done
}

impl StatusFilter {
  /// The status a task must have, or
  /// `None` when every status passes.
  pub fn status(
    self
  ) -> Option<TaskStatus> {
    match self {
      | Self::All => None,
      | Self::Todo => {
        Some(TaskStatus::Todo)
      }
      | Self::Running => {
        Some(TaskStatus::Running)
      }
      | Self::Done => {
        Some(TaskStatus::Done)
      }
    }
  }
}

impl From<TaskStatus> for StatusFilter {
  fn from(status: TaskStatus) -> Self {
    match status {
      | TaskStatus::Todo => Self::Todo,
      | TaskStatus::Running => {
        Self::Running
      }
      | TaskStatus::Done => Self::Done
    }
  }
}

impl FromStr for StatusFilter {
  type Err = ValidationError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(Self::All),
      | other => other
        .parse::<TaskStatus>()
        .map(Self::from)
        .map_err(|_| {
          ValidationError::new(format!(
            "unknown status filter \
             '{other}' (expected all, \
             todo, running or done)"
          ))
        })
    }
  }
}

impl fmt::Display for StatusFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self.status() {
      | Some(status) => {
        f.write_str(status.as_str())
      }
      | None => f.write_str("all")
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  #[default]
  Newest,
  Oldest
}

impl SortOrder {
  pub fn ascending(self) -> bool {
    matches!(self, Self::Oldest)
  }
}

impl FromStr for SortOrder {
  type Err = ValidationError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "newest" | "new" | "desc" => {
        Ok(Self::Newest)
      }
      | "oldest" | "old" | "asc" => {
        Ok(Self::Oldest)
      }
      | other => {
        Err(ValidationError::new(
          format!(
            "unknown sort order \
             '{other}' (expected \
             newest or oldest)"
          )
        ))
      }
    }
  }
}

impl fmt::Display for SortOrder {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | Self::Newest => {
        f.write_str("newest")
      }
      | Self::Oldest => {
        f.write_str("oldest")
      }
    }
  }
}

/// Which tasks to fetch and in what
/// order. Date bounds apply to
/// `due_date` and are inclusive.
#[derive(
  Debug,
  Clone,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct FilterSpec {
  pub status:     StatusFilter,
  pub date_from:  Option<DateTime<Utc>>,
  pub date_to:    Option<DateTime<Utc>>,
  pub sort_order: SortOrder
}

/// A date bound inside a
/// [`FilterPatch`]: leave it, set it,
/// or clear it.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub enum DateBound {
  #[default]
  Keep,
  Set(DateTime<Utc>),
  Clear
}

impl DateBound {
  fn apply(
    self,
    current: Option<DateTime<Utc>>
  ) -> Option<DateTime<Utc>> {
    match self {
      | Self::Keep => current,
      | Self::Set(value) => Some(value),
      | Self::Clear => None
    }
  }

  fn then(self, later: Self) -> Self {
    match later {
      | Self::Keep => self,
      | other => other
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub struct FilterPatch {
  pub status:     Option<StatusFilter>,
  pub date_from:  DateBound,
  pub date_to:    DateBound,
  pub sort_order: Option<SortOrder>
}

impl FilterPatch {
  pub fn status(
    status: StatusFilter
  ) -> Self {
    Self {
      status: Some(status),
      ..Self::default()
    }
  }

  pub fn sort(order: SortOrder) -> Self {
    Self {
      sort_order: Some(order),
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }

  /// Combines two patches; fields in
  /// `later` win.
  pub fn then(
    self,
    later: FilterPatch
  ) -> FilterPatch {
    FilterPatch {
      status:     later
        .status
        .or(self.status),
      date_from:  self
        .date_from
        .then(later.date_from),
      date_to:    self
        .date_to
        .then(later.date_to),
      sort_order: later
        .sort_order
        .or(self.sort_order)
    }
  }
}

impl FilterSpec {
  #[tracing::instrument(level = "trace", skip(self))]
  pub fn merge(
    &self,
    patch: FilterPatch
  ) -> FilterSpec {
    FilterSpec {
      status:     patch
        .status
        .unwrap_or(self.status),
      date_from:  patch
        .date_from
        .apply(self.date_from),
      date_to:    patch
        .date_to
        .apply(self.date_to),
      sort_order: patch
        .sort_order
        .unwrap_or(self.sort_order)
    }
  }

  pub fn has_date_bounds(&self) -> bool {
    self.date_from.is_some()
      || self.date_to.is_some()
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::*;

  fn at(day: u32) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 3, day, 0, 0, 0
      )
      .single()
      .expect("valid date")
  }

  #[test]
  fn default_spec_is_all_newest() {
    let spec = FilterSpec::default();
    assert_eq!(
      spec.status,
      StatusFilter::All
    );
    assert_eq!(
      spec.sort_order,
      SortOrder::Newest
    );
    assert!(!spec.has_date_bounds());
  }

  #[test]
  fn merge_keeps_unmentioned_fields() {
    let spec = FilterSpec {
      status:     StatusFilter::Todo,
      date_from:  Some(at(1)),
      date_to:    Some(at(9)),
      sort_order: SortOrder::Oldest
    };

    let merged = spec.merge(
      FilterPatch::status(
        StatusFilter::Done
      )
    );

    assert_eq!(
      merged.status,
      StatusFilter::Done
    );
    assert_eq!(
      merged.date_from,
      Some(at(1))
    );
    assert_eq!(
      merged.date_to,
      Some(at(9))
    );
    assert_eq!(
      merged.sort_order,
      SortOrder::Oldest
    );
  }

  #[test]
  fn explicit_clear_unsets_bound() {
    let spec = FilterSpec {
      date_from: Some(at(1)),
      date_to: Some(at(9)),
      ..FilterSpec::default()
    };

    let merged =
      spec.merge(FilterPatch {
        date_from: DateBound::Clear,
        ..FilterPatch::default()
      });

    assert_eq!(merged.date_from, None);
    assert_eq!(
      merged.date_to,
      Some(at(9))
    );
  }

  #[test]
  fn empty_patch_is_identity() {
    let spec = FilterSpec {
      status: StatusFilter::Running,
      date_to: Some(at(4)),
      ..FilterSpec::default()
    };
    assert!(
      FilterPatch::default().is_empty()
    );
    assert_eq!(
      spec.merge(FilterPatch::default()),
      spec
    );
  }

  #[test]
  fn sequential_merges_match_combined_patch()
  {
    let base = FilterSpec::default();
    let patches = [
      FilterPatch::status(
        StatusFilter::Todo
      ),
      FilterPatch {
        date_from: DateBound::Set(at(2)),
        ..FilterPatch::default()
      },
      FilterPatch {
        date_from: DateBound::Clear,
        date_to: DateBound::Set(at(8)),
        ..FilterPatch::default()
      },
      FilterPatch::sort(
        SortOrder::Oldest
      ),
      FilterPatch::default()
    ];

    for a in patches {
      for b in patches {
        let stepwise =
          base.merge(a).merge(b);
        let combined =
          base.merge(a.then(b));
        assert_eq!(
          stepwise, combined,
          "a={a:?} b={b:?}"
        );
      }
    }
  }

  #[test]
  fn parses_filter_tokens() {
    assert_eq!(
      "ALL"
        .parse::<StatusFilter>()
        .expect("parse"),
      StatusFilter::All
    );
    assert_eq!(
      "running"
        .parse::<StatusFilter>()
        .expect("parse"),
      StatusFilter::Running
    );
    assert!(
      "paused"
        .parse::<StatusFilter>()
        .is_err()
    );
    assert_eq!(
      "oldest"
        .parse::<SortOrder>()
        .expect("parse"),
      SortOrder::Oldest
    );
    assert!(
      "random"
        .parse::<SortOrder>()
        .is_err()
    );
  }
}
