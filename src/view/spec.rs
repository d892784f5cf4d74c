use crate::config::Timezone;
use crate::content::normalize_category;
use crate::error::InvalidViewSpec;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Weekday};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    Title,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" => Some(SortOrder::Newest),
            "oldest" => Some(SortOrder::Oldest),
            "title" => Some(SortOrder::Title),
            _ => None,
        }
    }
}

/// Calendar window a view is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSpec {
    Year(i32),
    Month(i32, u32),
    Day(NaiveDate),
    /// ISO year and week number.
    Week(i32, u32),
}

impl DateSpec {
    /// Parse `YYYY`, `YYYYMM`, `YYYYMMDD` or `YYYY_WW`.
    pub fn parse(raw: &str) -> Result<Self, InvalidViewSpec> {
        let bad = |reason| InvalidViewSpec::value("date", raw, reason);
        let raw = raw.trim();
        if !raw.is_ascii() {
            return Err(bad("expected YYYY, YYYYMM or YYYYMMDD"));
        }

        if let Some((year, week)) = raw.split_once('_') {
            let year = parse_digits(year, 4).ok_or_else(|| bad("expected YYYY_WW"))?;
            let week = parse_digits(week, 2).ok_or_else(|| bad("expected YYYY_WW"))?;
            NaiveDate::from_isoywd_opt(year, week as u32, Weekday::Mon)
                .ok_or_else(|| bad("no such ISO week"))?;
            return Ok(DateSpec::Week(year, week as u32));
        }

        let year = raw
            .get(..4)
            .and_then(|y| parse_digits(y, 4))
            .ok_or_else(|| bad("expected YYYY, YYYYMM or YYYYMMDD"))?;
        match raw.len() {
            4 => Ok(DateSpec::Year(year)),
            6 => {
                let month = parse_digits(&raw[4..6], 2).ok_or_else(|| bad("bad month"))? as u32;
                NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| bad("no such month"))?;
                Ok(DateSpec::Month(year, month))
            }
            8 => {
                let month = parse_digits(&raw[4..6], 2).ok_or_else(|| bad("bad month"))? as u32;
                let day = parse_digits(&raw[6..8], 2).ok_or_else(|| bad("bad day"))? as u32;
                NaiveDate::from_ymd_opt(year, month, day)
                    .map(DateSpec::Day)
                    .ok_or_else(|| bad("no such day"))
            }
            _ => Err(bad("expected YYYY, YYYYMM or YYYYMMDD")),
        }
    }

    /// Inclusive start and exclusive end of the window in `tz`.
    pub fn bounds(
        &self,
        tz: Timezone,
    ) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
        let (start, end) = match *self {
            DateSpec::Year(y) => (
                NaiveDate::from_ymd_opt(y, 1, 1)?,
                NaiveDate::from_ymd_opt(y + 1, 1, 1)?,
            ),
            DateSpec::Month(y, m) => {
                let start = NaiveDate::from_ymd_opt(y, m, 1)?;
                let end = if m == 12 {
                    NaiveDate::from_ymd_opt(y + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(y, m + 1, 1)?
                };
                (start, end)
            }
            DateSpec::Day(d) => (d, d.succ_opt()?),
            DateSpec::Week(y, w) => {
                let start = NaiveDate::from_isoywd_opt(y, w, Weekday::Mon)?;
                (start, start + Duration::days(7))
            }
        };
        Some((
            tz.localize(start.and_hms_opt(0, 0, 0)?)?,
            tz.localize(end.and_hms_opt(0, 0, 0)?)?,
        ))
    }

    pub fn year(&self) -> i32 {
        match *self {
            DateSpec::Year(y) | DateSpec::Month(y, _) | DateSpec::Week(y, _) => y,
            DateSpec::Day(d) => d.year(),
        }
    }
}

fn parse_digits(s: &str, len: usize) -> Option<i32> {
    if s.len() == len && s.chars().all(|c| c.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// Declarative filter for a [`super::View`]. Every field is optional; an
/// unset field means "no restriction" (or the documented default).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSpec {
    pub category: Option<String>,
    pub recurse: Option<bool>,
    pub future: Option<bool>,
    pub date: Option<DateSpec>,
    pub start_entry: Option<i64>,
    pub last_entry: Option<i64>,
    pub prev_entry: Option<i64>,
    pub next_entry: Option<i64>,
    pub limit: Option<usize>,
    pub sort: Option<SortOrder>,
}

impl ViewSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from string options as they arrive from request arguments or
    /// templates. Unknown keys and malformed values are rejected.
    pub fn from_args<I, K, V>(args: I) -> Result<Self, InvalidViewSpec>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut spec = ViewSpec::default();
        for (key, value) in args {
            let value = value.as_ref();
            match key.as_ref() {
                "category" => spec.category = Some(normalize_category(value)),
                "recurse" => spec.recurse = Some(parse_bool("recurse", value)?),
                "future" => spec.future = Some(parse_bool("future", value)?),
                "date" => spec.date = Some(DateSpec::parse(value)?),
                "start_entry" => spec.start_entry = Some(parse_id("start_entry", value)?),
                "last_entry" => spec.last_entry = Some(parse_id("last_entry", value)?),
                "prev_entry" => spec.prev_entry = Some(parse_id("prev_entry", value)?),
                "next_entry" => spec.next_entry = Some(parse_id("next_entry", value)?),
                "limit" => {
                    let limit = value
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| InvalidViewSpec::value("limit", value, "not an integer"))?;
                    if limit <= 0 {
                        return Err(InvalidViewSpec::NonPositiveLimit);
                    }
                    spec.limit = Some(limit as usize);
                }
                "sort" => {
                    spec.sort = Some(SortOrder::parse(value).ok_or_else(|| {
                        InvalidViewSpec::value("sort", value, "expected newest, oldest or title")
                    })?)
                }
                other => return Err(InvalidViewSpec::UnknownKey(other.to_string())),
            }
        }
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), InvalidViewSpec> {
        if self.limit == Some(0) {
            return Err(InvalidViewSpec::NonPositiveLimit);
        }
        for (key, id) in self.cursors() {
            if id <= 0 {
                return Err(InvalidViewSpec::value(key, id.to_string(), "not an entry id"));
            }
        }
        Ok(())
    }

    /// `self` with every option set in `extra` taking precedence.
    pub fn merged(&self, extra: &ViewSpec) -> ViewSpec {
        ViewSpec {
            category: extra.category.clone().or_else(|| self.category.clone()),
            recurse: extra.recurse.or(self.recurse),
            future: extra.future.or(self.future),
            date: extra.date.or(self.date),
            start_entry: extra.start_entry.or(self.start_entry),
            last_entry: extra.last_entry.or(self.last_entry),
            prev_entry: extra.prev_entry.or(self.prev_entry),
            next_entry: extra.next_entry.or(self.next_entry),
            limit: extra.limit.or(self.limit),
            sort: extra.sort.or(self.sort),
        }
    }

    pub(crate) fn cursors(&self) -> impl Iterator<Item = (&'static str, i64)> {
        [
            ("start_entry", self.start_entry),
            ("last_entry", self.last_entry),
            ("prev_entry", self.prev_entry),
            ("next_entry", self.next_entry),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
    }

    pub fn category(mut self, category: impl AsRef<str>) -> Self {
        self.category = Some(normalize_category(category.as_ref()));
        self
    }

    pub fn recurse(mut self, recurse: bool) -> Self {
        self.recurse = Some(recurse);
        self
    }

    pub fn future(mut self, future: bool) -> Self {
        self.future = Some(future);
        self
    }

    pub fn date(mut self, date: DateSpec) -> Self {
        self.date = Some(date);
        self
    }

    pub fn start_entry(mut self, id: i64) -> Self {
        self.start_entry = Some(id);
        self
    }

    pub fn last_entry(mut self, id: i64) -> Self {
        self.last_entry = Some(id);
        self
    }

    pub fn prev_entry(mut self, id: i64) -> Self {
        self.prev_entry = Some(id);
        self
    }

    pub fn next_entry(mut self, id: i64) -> Self {
        self.next_entry = Some(id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, InvalidViewSpec> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(InvalidViewSpec::value(key, value, "expected a boolean")),
    }
}

fn parse_id(key: &'static str, value: &str) -> Result<i64, InvalidViewSpec> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| InvalidViewSpec::value(key, value, "not an entry id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_args_parses_every_option() {
        let spec = ViewSpec::from_args([
            ("category", "/blog/tech/"),
            ("recurse", "yes"),
            ("future", "0"),
            ("date", "201802"),
            ("start_entry", "12"),
            ("limit", "5"),
            ("sort", "Oldest"),
        ])
        .unwrap();
        assert_eq!(spec.category.as_deref(), Some("blog/tech"));
        assert_eq!(spec.recurse, Some(true));
        assert_eq!(spec.future, Some(false));
        assert_eq!(spec.date, Some(DateSpec::Month(2018, 2)));
        assert_eq!(spec.start_entry, Some(12));
        assert_eq!(spec.limit, Some(5));
        assert_eq!(spec.sort, Some(SortOrder::Oldest));
    }

    #[test]
    fn from_args_rejects_bad_input() {
        assert_eq!(
            ViewSpec::from_args([("colour", "red")]),
            Err(InvalidViewSpec::UnknownKey("colour".into()))
        );
        assert_eq!(
            ViewSpec::from_args([("limit", "0")]),
            Err(InvalidViewSpec::NonPositiveLimit)
        );
        assert!(ViewSpec::from_args([("limit", "many")]).is_err());
        assert!(ViewSpec::from_args([("sort", "random")]).is_err());
        assert!(ViewSpec::from_args([("recurse", "perhaps")]).is_err());
        assert!(ViewSpec::from_args([("next_entry", "-1")]).is_err());
        assert!(ViewSpec::from_args([("date", "2018-02")]).is_err());
        assert!(ViewSpec::from_args([("date", "2018aéb")]).is_err());
        assert!(ViewSpec::from_args([("date", "2018é1")]).is_err());
        assert!(ViewSpec::from_args([("date", "2018_é")]).is_err());
    }

    #[test]
    fn date_spec_forms() {
        assert_eq!(DateSpec::parse("2018").unwrap(), DateSpec::Year(2018));
        assert_eq!(
            DateSpec::parse("20180229").unwrap_err(),
            InvalidViewSpec::value("date", "20180229", "no such day")
        );
        assert_eq!(
            DateSpec::parse("20200229").unwrap(),
            DateSpec::Day(NaiveDate::from_ymd_opt(2020, 2, 29).unwrap())
        );
        assert_eq!(DateSpec::parse("2020_53").unwrap(), DateSpec::Week(2020, 53));
        assert!(DateSpec::parse("2021_53").is_err());
        assert!(DateSpec::parse("201813").is_err());
        assert!(DateSpec::parse("18").is_err());
    }

    #[test]
    fn date_bounds() {
        let tz = Timezone::parse("+00:00").unwrap();
        let (s, e) = DateSpec::Month(2018, 12).bounds(tz).unwrap();
        assert_eq!(s.to_rfc3339(), "2018-12-01T00:00:00+00:00");
        assert_eq!(e.to_rfc3339(), "2019-01-01T00:00:00+00:00");

        let (s, e) = DateSpec::Week(2020, 1).bounds(tz).unwrap();
        assert_eq!(s.to_rfc3339(), "2019-12-30T00:00:00+00:00");
        assert_eq!(e.to_rfc3339(), "2020-01-06T00:00:00+00:00");

        let tz = Timezone::parse("-08:00").unwrap();
        let (s, _) = DateSpec::Year(2018).bounds(tz).unwrap();
        assert_eq!(s.to_rfc3339(), "2018-01-01T00:00:00-08:00");
    }

    #[test]
    fn merge_prefers_extra() {
        let base = ViewSpec::new().category("blog").limit(10).sort(SortOrder::Title);
        let merged = base.merged(&ViewSpec::new().limit(2).start_entry(4));
        assert_eq!(merged.category.as_deref(), Some("blog"));
        assert_eq!(merged.limit, Some(2));
        assert_eq!(merged.sort, Some(SortOrder::Title));
        assert_eq!(merged.start_entry, Some(4));
        assert_eq!(base.limit, Some(10));
    }
}
