//! Derives the canonical item set for a collection, either from the manifest
//! item list or by inferring temporal labels from raster filenames.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::manifest::RawItem;

/// One raster layer entry before metadata enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDescriptor {
    pub id: String,
    pub year: String,
    pub source_file: String,
    pub properties: Map<String, Value>,
}

impl ItemDescriptor {
    /// The representative year as a number; items with unparseable or
    /// non-positive years are rejected up front.
    pub fn year_number(self: &Self) -> Result<i32> {
        match self.year.parse::<i32>() {
            Ok(year) if year > 0 => Ok(year),
            _ => Err(Error::InvalidYear {
                id: self.id.clone(),
                year: self.year.clone(),
            }),
        }
    }
}

/// Dec 31 of the given year, computed as Jan 1 of the next year minus a day.
pub fn year_end(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year + 1, 1, 1).expect("Jan 1 is always a valid date") - Duration::days(1)
}

pub fn year_start(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).expect("Jan 1 is always a valid date")
}

/// One descriptor per manifest entry, fields copied directly, sorted
/// ascending by year. Ids must be unique across the set.
pub fn from_manifest(raw_items: &[RawItem]) -> Result<Vec<ItemDescriptor>> {
    let mut descriptors = Vec::with_capacity(raw_items.len());
    let mut seen_ids: HashSet<String> = HashSet::new();

    for raw in raw_items {
        if !seen_ids.insert(raw.id.clone()) {
            return Err(Error::DuplicateItemId(raw.id.clone()));
        }
        descriptors.push(ItemDescriptor {
            id: raw.id.clone(),
            year: raw.year.clone(),
            source_file: raw.assets.input_file.clone(),
            properties: raw.properties.clone(),
        });
    }

    sort_by_year(descriptors)
}

/// Derive descriptors from raster filenames. A period label
/// (`2006-2010` or `2006_2010`) wins over any single year in the name;
/// otherwise the highest 4-digit run is the year. Files are taken in the
/// order given; the result is sorted ascending by year.
pub fn from_filenames<S: AsRef<str>>(file_names: &[S]) -> Result<Vec<ItemDescriptor>> {
    let mut descriptors = Vec::with_capacity(file_names.len());
    let mut seen_ids: HashSet<String> = HashSet::new();

    for file_name in file_names {
        let file_name = file_name.as_ref();
        let (id, year) = derive_label(file_name)?;

        if !seen_ids.insert(id.clone()) {
            return Err(Error::DuplicateItemId(id));
        }
        descriptors.push(ItemDescriptor {
            id,
            year,
            source_file: file_name.to_string(),
            properties: Map::new(),
        });
    }

    sort_by_year(descriptors)
}

/// (id, year) for a single filename, per the period-then-single-year rules.
fn derive_label(file_name: &str) -> Result<(String, String)> {
    let period_pattern = Regex::new(r"(?P<start>\d{4})\s*[-_]\s*(?P<end>\d{4})")
        .expect("Regex pattern should always compile");
    let year_pattern = Regex::new(r"\d{4}").expect("Regex pattern should always compile");

    if let Some(captures) = period_pattern.captures(file_name) {
        let mut start: i32 = captures["start"].parse().expect("4 digits parse as i32");
        let mut end: i32 = captures["end"].parse().expect("4 digits parse as i32");
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }
        return Ok((format!("{start}-{end}"), end.to_string()));
    }

    let max_year = year_pattern
        .find_iter(file_name)
        .map(|m| m.as_str().parse::<i32>().expect("4 digits parse as i32"))
        .max();
    match max_year {
        Some(year) => Ok((year.to_string(), year.to_string())),
        None => Err(Error::UnparseableFilename(file_name.to_string())),
    }
}

fn sort_by_year(descriptors: Vec<ItemDescriptor>) -> Result<Vec<ItemDescriptor>> {
    let mut keyed = descriptors
        .into_iter()
        .map(|d| Ok((d.year_number()?, d)))
        .collect::<Result<Vec<_>>>()?;
    // Stable sort: ties keep the input order.
    keyed.sort_by_key(|(year, _)| *year);
    Ok(keyed.into_iter().map(|(_, d)| d).collect())
}
