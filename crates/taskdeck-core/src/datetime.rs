use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

use crate::error::ValidationError;

const TIMEZONE_CONFIG_FILE: &str =
  "taskdeck-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "TASKDECK_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "TASKDECK_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>
}

/// Which end of a calendar day a
/// date-only expression resolves to.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum DayEdge {
  Start,
  End
}

pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

#[must_use]
pub fn format_project_datetime(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(project_timezone())
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  chrono_tz::UTC
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let Some(timezone) = parsed.timezone
  else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn to_utc_from_project_local(
  local_naive: NaiveDateTime,
  context: &str
) -> Result<DateTime<Utc>, ValidationError>
{
  match project_timezone()
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(ValidationError::new(format!(
        "local datetime does not exist \
         in configured timezone: \
         {context}"
      )))
    }
  }
}

fn day_edge_time(edge: DayEdge) -> NaiveTime {
  match edge {
    | DayEdge::Start => NaiveTime::default(),
    | DayEdge::End => {
      NaiveTime::from_hms_milli_opt(
        23, 59, 59, 999
      )
      .unwrap_or_default()
    }
  }
}

fn local_day(
  date: NaiveDate,
  edge: DayEdge,
  context: &str
) -> Result<DateTime<Utc>, ValidationError>
{
  to_utc_from_project_local(
    date.and_time(day_edge_time(edge)),
    context
  )
}

/// Parses a user-entered date or
/// timestamp. Date-only forms resolve
/// to the start of the day.
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>
) -> Result<DateTime<Utc>, ValidationError>
{
  parse_date_bound(
    input,
    now,
    DayEdge::Start
  )
}

/// Like [`parse_date_expr`], but a
/// date-only form resolves to `edge`
/// of that day, so `--to 2026-03-31`
/// includes the whole of March 31.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_bound(
  input: &str,
  now: DateTime<Utc>,
  edge: DayEdge
) -> Result<DateTime<Utc>, ValidationError>
{
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = now
    .with_timezone(project_timezone())
    .date_naive();

  match lower.as_str() {
    | "" => {
      return Err(ValidationError::new(
        "date is empty"
      ));
    }
    | "now" => return Ok(now),
    | "today" => {
      return local_day(
        today, edge, "today"
      );
    }
    | "tomorrow" => {
      return local_day(
        today + Duration::days(1),
        edge,
        "tomorrow"
      );
    }
    | "yesterday" => {
      return local_day(
        today - Duration::days(1),
        edge,
        "yesterday"
      );
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return local_day(
      next_weekday_date(today, target),
      edge,
      "weekday-name"
    );
  }

  if let Some(date) =
    parse_month_day(&lower, today)
  {
    return local_day(
      date,
      edge,
      "month-day"
    );
  }

  if let Some(duration) =
    parse_relative(token)
  {
    return Ok(now + duration);
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return local_day(date, edge, "date");
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_project_local(
        ndt, fmt
      );
    }
  }

  Err(ValidationError::new(format!(
    "unrecognized date '{input}' \
     (supported: now, today, \
     tomorrow, yesterday, weekday \
     names, 'mar 5[, 2026]', \
     +Nd/-Nd/+Nh/+Nm, \
     YYYY-MM-DD, YYYY-MM-DD HH:MM, \
     RFC3339)"
  )))
}

fn parse_relative(
  token: &str
) -> Option<Duration> {
  static RELATIVE: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  let re = RELATIVE
    .get_or_init(|| {
      Regex::new(
        r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$"
      )
      .ok()
    })
    .as_ref()?;

  let caps = re.captures(token)?;
  let num: i64 =
    caps.name("num")?.as_str().parse().ok()?;
  let duration =
    match caps.name("unit")?.as_str() {
      | "d" => Duration::days(num),
      | "h" => Duration::hours(num),
      | "m" => Duration::minutes(num),
      | _ => return None
    };

  Some(
    if &caps["sign"] == "-" {
      -duration
    } else {
      duration
    }
  )
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thurs" => {
      Some(Weekday::Thu)
    }
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn parse_month_name(
  token: &str
) -> Option<u32> {
  const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may",
    "jun", "jul", "aug", "sep", "oct",
    "nov", "dec"
  ];
  if token.len() < 3 {
    return None;
  }
  MONTHS
    .iter()
    .position(|abbr| {
      token.starts_with(abbr)
        && (token.len() == 3
          || full_month_name(abbr)
            .is_some_and(|full| {
              full.starts_with(token)
            }))
    })
    .map(|idx| idx as u32 + 1)
}

fn full_month_name(
  abbr: &str
) -> Option<&'static str> {
  Some(match abbr {
    | "jan" => "january",
    | "feb" => "february",
    | "mar" => "march",
    | "apr" => "april",
    | "may" => "may",
    | "jun" => "june",
    | "jul" => "july",
    | "aug" => "august",
    | "sep" => "september",
    | "oct" => "october",
    | "nov" => "november",
    | "dec" => "december",
    | _ => return None
  })
}

/// `mar 5`, `march 5 2026` or
/// `Mar 05, 2026` (the display form).
/// Without a year the next such day on
/// or after `today` is used.
fn parse_month_day(
  token: &str,
  today: NaiveDate
) -> Option<NaiveDate> {
  let cleaned = token.replace(',', " ");
  let parts: Vec<&str> =
    cleaned.split_whitespace().collect();
  let (month, day, year) = match parts
    .as_slice()
  {
    | [month, day] => {
      (*month, *day, None)
    }
    | [month, day, year] => {
      (*month, *day, Some(*year))
    }
    | _ => return None
  };

  let month = parse_month_name(month)?;
  let day: u32 = day.parse().ok()?;
  match year {
    | Some(year) => {
      NaiveDate::from_ymd_opt(
        year.parse().ok()?,
        month,
        day
      )
    }
    | None => {
      let this_year =
        NaiveDate::from_ymd_opt(
          today.year(),
          month,
          day
        );
      match this_year {
        | Some(date) if date >= today => {
          Some(date)
        }
        | _ => NaiveDate::from_ymd_opt(
          today.year() + 1,
          month,
          day
        )
      }
    }
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from + Duration::days(delta)
}
