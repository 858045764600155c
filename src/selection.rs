use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use regex::Regex;

use crate::domain::Coordinate;
use crate::error::QueryError;
use crate::index::CatalogView;

pub const ALL_TOKEN: &str = "a";
pub const PATTERN_TOKEN: &str = "r";

/// Chosen index ranges per category id, kept sorted and merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet(BTreeMap<u32, Vec<RangeInclusive<u32>>>);

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, coordinate: Coordinate) {
        self.insert_range(coordinate.category, coordinate.index..=coordinate.index);
    }

    pub fn insert_range(&mut self, category: u32, range: RangeInclusive<u32>) {
        let ranges = self.0.entry(category).or_default();
        ranges.push(range);
        merge_ranges(ranges);
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    pub fn ranges(&self, category: u32) -> &[RangeInclusive<u32>] {
        self.0.get(&category).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, coordinate: Coordinate) -> bool {
        self.ranges(coordinate.category)
            .iter()
            .any(|range| range.contains(&coordinate.index))
    }

    pub fn encode(&self) -> String {
        self.0
            .iter()
            .filter(|(_, ranges)| !ranges.is_empty())
            .map(|(category, ranges)| format!("{category}:{}", encode_ranges(ranges)))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl FromIterator<Coordinate> for SelectionSet {
    fn from_iter<I: IntoIterator<Item = Coordinate>>(iter: I) -> Self {
        let mut set = SelectionSet::new();
        for coordinate in iter {
            set.0
                .entry(coordinate.category)
                .or_default()
                .push(coordinate.index..=coordinate.index);
        }
        set.0.values_mut().for_each(merge_ranges);
        set
    }
}

impl fmt::Display for SelectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for SelectionSet {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_selection(value)
    }
}

fn merge_ranges(ranges: &mut Vec<RangeInclusive<u32>>) {
    ranges.sort_by_key(|range| (*range.start(), *range.end()));
    let mut merged: Vec<RangeInclusive<u32>> = Vec::with_capacity(ranges.len());
    for range in ranges.drain(..) {
        match merged.last_mut() {
            Some(last)
                if last
                    .end()
                    .checked_add(1)
                    .is_none_or(|next| *range.start() <= next) =>
            {
                if range.end() > last.end() {
                    *last = *last.start()..=*range.end();
                }
            }
            _ => merged.push(range),
        }
    }
    *ranges = merged;
}

fn encode_ranges(ranges: &[RangeInclusive<u32>]) -> String {
    ranges
        .iter()
        .map(|range| {
            if range.start() == range.end() {
                range.start().to_string()
            } else {
                format!("{}-{}", range.start(), range.end())
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parse_selection(input: &str) -> Result<SelectionSet, QueryError> {
    let mut selection = SelectionSet::new();
    for clause in input.split(';') {
        let mut parts = clause.split(':');
        let (Some(category), Some(items), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(syntax_error(clause));
        };
        let category = parse_number(category).ok_or_else(|| syntax_error(clause))?;
        let ranges = selection.0.entry(category).or_default();
        for item in items.split(',') {
            match item.split_once('-') {
                None => {
                    let index = parse_number(item).ok_or_else(|| syntax_error(item))?;
                    ranges.push(index..=index);
                }
                Some((start, end)) => {
                    let start = parse_number(start).ok_or_else(|| syntax_error(item))?;
                    let end = parse_number(end).ok_or_else(|| syntax_error(item))?;
                    if start > end {
                        return Err(syntax_error(item));
                    }
                    ranges.push(start..=end);
                }
            }
        }
    }
    selection.0.values_mut().for_each(merge_ranges);
    Ok(selection)
}

fn parse_number(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

fn syntax_error(fragment: &str) -> QueryError {
    QueryError::SelectionSyntax {
        fragment: fragment.trim().to_string(),
    }
}

#[derive(Debug, Clone)]
pub enum Selection {
    All,
    Pattern(Regex),
    Explicit(SelectionSet),
}

impl Selection {
    pub fn pattern(pattern: &str) -> Result<Self, QueryError> {
        Regex::new(pattern)
            .map(Selection::Pattern)
            .map_err(|err| QueryError::InvalidPattern {
                pattern: pattern.to_string(),
                message: err.to_string(),
            })
    }

    pub fn explicit(input: &str) -> Result<Self, QueryError> {
        parse_selection(input).map(Selection::Explicit)
    }

    pub fn resolve(&self, view: &CatalogView) -> Result<Vec<String>, QueryError> {
        let urls: BTreeSet<String> = match self {
            Selection::All => view.files().map(|file| file.record.url.clone()).collect(),
            Selection::Pattern(regex) => view
                .files()
                .filter(|file| regex.is_match(&file.record.filename))
                .map(|file| file.record.url.clone())
                .collect(),
            Selection::Explicit(set) => resolve_explicit(set, view)?,
        };
        Ok(urls.into_iter().collect())
    }
}

fn resolve_explicit(set: &SelectionSet, view: &CatalogView) -> Result<BTreeSet<String>, QueryError> {
    let mut urls = BTreeSet::new();
    for (&category, ranges) in &set.0 {
        let listed = view.category_len(category);
        for range in ranges {
            let (start, end) = (*range.start(), *range.end());
            if start == 0 || end > listed {
                return Err(QueryError::UnknownCoordinate {
                    category,
                    index: if start == 0 { 0 } else { start.max(listed.saturating_add(1)) },
                });
            }
            for index in start..=end {
                let coordinate = Coordinate { category, index };
                let url = view
                    .url_at(coordinate)
                    .ok_or(QueryError::UnknownCoordinate { category, index })?;
                urls.insert(url.to_string());
            }
        }
    }
    Ok(urls)
}
