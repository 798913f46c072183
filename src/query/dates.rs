use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use crate::query::ast::PrimitiveQuery;

/// Canonical fixed-width form stored for date ordering fields:
/// `YYYY-MM-DDTHH:MM:SS.mmm`, zero padded, lexicographically ordered.
pub fn canonical_date_string(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Parse a date literal: RFC 3339, the canonical form, or a bare date.
pub fn parse_date_literal(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.3f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

// Calendar component boundaries inside the canonical string, year first.
const SEGMENTS: [(usize, usize); 7] =
    [(0, 4), (5, 7), (8, 10), (11, 13), (14, 16), (17, 19), (20, 23)];

const MIN_FILL: &str = "0000-01-01T00:00:00.000";
const MAX_FILL: &str = "9999-12-31T23:59:59.999";

fn component(value: &str, level: usize) -> u32 {
    let (start, end) = SEGMENTS[level];
    value[start..end].parse().unwrap_or(0)
}

fn with_component(value: &str, level: usize, component: u32) -> String {
    let (start, end) = SEGMENTS[level];
    format!(
        "{}{:0width$}{}",
        &value[..start],
        component,
        &value[end..],
        width = end - start
    )
}

fn fill_min_below(value: &str, level: usize) -> String {
    let (_, end) = SEGMENTS[level];
    format!("{}{}", &value[..end], &MIN_FILL[end..])
}

fn fill_max_below(value: &str, level: usize) -> String {
    let (_, end) = SEGMENTS[level];
    format!("{}{}", &value[..end], &MAX_FILL[end..])
}

fn max_component(level: usize) -> u32 {
    let (start, end) = SEGMENTS[level];
    MAX_FILL[start..end].parse().unwrap_or(0)
}

fn range(field: &str, lower: String, upper: String, include_lower: bool, include_upper: bool) -> PrimitiveQuery {
    PrimitiveQuery::Range {
        field: field.to_string(),
        lower: Some(lower),
        upper: Some(upper),
        include_lower,
        include_upper,
    }
}

/// Clauses covering `[start, <end of the unit fixed above `level`>]`.
/// Emits one exact-prefix clause when the tail of `start` is already the
/// minimum, else recurses a level deeper and adds one bounded range for the
/// values of this component above the start's.
fn ascending(field: &str, start: &str, level: usize, include_start: bool) -> Vec<PrimitiveQuery> {
    let (seg_start, _) = SEGMENTS[level];
    if include_start && start[seg_start..] == MIN_FILL[seg_start..] {
        // The whole coarser unit, as a single prefix term
        return vec![PrimitiveQuery::Prefix {
            field: field.to_string(),
            prefix: start[..seg_start].to_string(),
        }];
    }
    if level == SEGMENTS.len() - 1 {
        return vec![range(
            field,
            start.to_string(),
            fill_max_below(start, level - 1),
            include_start,
            true,
        )];
    }
    let mut clauses = ascending(field, start, level + 1, include_start);
    let current = component(start, level);
    if current < max_component(level) {
        let lower = fill_min_below(&with_component(start, level, current + 1), level);
        let upper = if level == 0 {
            MAX_FILL.to_string()
        } else {
            fill_max_below(start, level - 1)
        };
        clauses.push(range(field, lower, upper, true, true));
    }
    clauses
}

/// Mirror of `ascending`: clauses covering
/// `[<start of the unit fixed above `level`>, end]`.
fn descending(field: &str, end: &str, level: usize, include_end: bool) -> Vec<PrimitiveQuery> {
    let (seg_start, _) = SEGMENTS[level];
    if include_end && end[seg_start..] == MAX_FILL[seg_start..] {
        return vec![PrimitiveQuery::Prefix {
            field: field.to_string(),
            prefix: end[..seg_start].to_string(),
        }];
    }
    if level == SEGMENTS.len() - 1 {
        return vec![range(
            field,
            fill_min_below(end, level - 1),
            end.to_string(),
            true,
            include_end,
        )];
    }
    let mut clauses = descending(field, end, level + 1, include_end);
    let current = component(end, level);
    let floor = component(MIN_FILL, level);
    if current > floor {
        let upper = fill_max_below(&with_component(end, level, current - 1), level);
        let lower = if level == 0 {
            MIN_FILL.to_string()
        } else {
            fill_min_below(end, level - 1)
        };
        clauses.push(range(field, lower, upper, true, true));
    }
    clauses
}

/// Decompose a calendar range into a union of exact-prefix and bounded-range
/// clauses: walk components from year to millisecond; at the first differing
/// component, fill the rest of the start's unit, span the whole components
/// strictly between, and fill the head of the end's unit.
pub fn decompose_date_range(
    field: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    include_start: bool,
    include_end: bool,
) -> PrimitiveQuery {
    let s = canonical_date_string(start);
    let e = canonical_date_string(end);
    if s > e {
        return PrimitiveQuery::MatchNone;
    }
    if s == e {
        if include_start && include_end {
            return PrimitiveQuery::Term {
                field: field.to_string(),
                text: s,
            };
        }
        return PrimitiveQuery::MatchNone;
    }

    let mut level = 0;
    while component(&s, level) == component(&e, level) {
        level += 1;
    }

    if level == SEGMENTS.len() - 1 {
        // Only milliseconds differ: one bounded range
        return range(field, s, e, include_start, include_end);
    }

    let mut clauses = ascending(field, &s, level + 1, include_start);
    let start_component = component(&s, level);
    let end_component = component(&e, level);
    if end_component > start_component + 1 {
        let lower = fill_min_below(&with_component(&s, level, start_component + 1), level);
        let upper = fill_max_below(&with_component(&e, level, end_component - 1), level);
        clauses.push(range(field, lower, upper, true, true));
    }
    clauses.extend(descending(field, &e, level + 1, include_end));

    PrimitiveQuery::or_of(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    // Evaluate a decomposed clause set against a raw canonical string.
    fn clause_matches(query: &PrimitiveQuery, value: &str) -> bool {
        match query {
            PrimitiveQuery::MatchNone => false,
            PrimitiveQuery::Term { text, .. } => value == text,
            PrimitiveQuery::Prefix { prefix, .. } => value.starts_with(prefix.as_str()),
            PrimitiveQuery::Range {
                lower,
                upper,
                include_lower,
                include_upper,
                ..
            } => {
                let above = match lower.as_deref() {
                    Some(l) if *include_lower => value >= l,
                    Some(l) => value > l,
                    None => true,
                };
                let below = match upper.as_deref() {
                    Some(u) if *include_upper => value <= u,
                    Some(u) => value < u,
                    None => true,
                };
                above && below
            }
            PrimitiveQuery::Bool { clauses } => clauses
                .iter()
                .any(|(_, clause)| clause_matches(clause, value)),
            other => panic!("unexpected clause {:?}", other),
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
            + chrono::Duration::milliseconds(ms as i64)
    }

    #[test]
    fn canonical_form_is_fixed_width() {
        let value = utc(2024, 3, 5, 9, 4, 7, 12);
        assert_eq!(canonical_date_string(&value), "2024-03-05T09:04:07.012");
    }

    #[test]
    fn decomposition_matches_brute_force_scan() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut samples = Vec::new();
        for _ in 0..400 {
            samples.push(utc(
                rng.gen_range(2019..=2026),
                rng.gen_range(1..=12),
                rng.gen_range(1..=28),
                rng.gen_range(0..24),
                rng.gen_range(0..60),
                rng.gen_range(0..60),
                rng.gen_range(0..1000),
            ));
        }

        for _ in 0..60 {
            let mut a = samples[rng.gen_range(0..samples.len())];
            let mut b = samples[rng.gen_range(0..samples.len())];
            if a > b {
                std::mem::swap(&mut a, &mut b);
            }
            for (include_start, include_end) in
                [(true, true), (true, false), (false, true), (false, false)]
            {
                let query = decompose_date_range("@d", &a, &b, include_start, include_end);
                let lower = canonical_date_string(&a);
                let upper = canonical_date_string(&b);
                for sample in &samples {
                    let value = canonical_date_string(sample);
                    let above = if include_start { value >= lower } else { value > lower };
                    let below = if include_end { value <= upper } else { value < upper };
                    assert_eq!(
                        clause_matches(&query, &value),
                        above && below,
                        "value {} in [{} {}] incl=({},{})",
                        value,
                        lower,
                        upper,
                        include_start,
                        include_end
                    );
                }
            }
        }
    }

    #[test]
    fn whole_year_collapses_to_prefixes() {
        let start = utc(2024, 1, 1, 0, 0, 0, 0);
        let end = utc(2024, 12, 31, 23, 59, 59, 999);
        let query = decompose_date_range("@d", &start, &end, true, true);
        // Everything in 2024 shares the year prefix
        assert!(clause_matches(&query, "2024-06-15T12:00:00.000"));
        assert!(!clause_matches(&query, "2025-01-01T00:00:00.000"));
        assert!(!clause_matches(&query, "2023-12-31T23:59:59.999"));
    }

    #[test]
    fn empty_and_point_ranges() {
        let a = utc(2024, 5, 1, 0, 0, 0, 0);
        let b = utc(2024, 4, 1, 0, 0, 0, 0);
        assert_eq!(
            decompose_date_range("@d", &a, &b, true, true),
            PrimitiveQuery::MatchNone
        );
        let point = decompose_date_range("@d", &a, &a, true, true);
        assert!(clause_matches(&point, "2024-05-01T00:00:00.000"));
        assert_eq!(
            decompose_date_range("@d", &a, &a, true, false),
            PrimitiveQuery::MatchNone
        );
    }
}
