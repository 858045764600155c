use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use tracing::warn;

use crate::catalog::GroupedRecords;
use crate::domain::{Coordinate, FileRecord, IntegritySignal};

pub const LISTING_WIDTH: usize = 80;

pub type IntegrityMap = BTreeMap<String, IntegritySignal>;

#[derive(Debug, Clone, Serialize)]
pub struct IndexedFile {
    pub coordinate: Coordinate,
    pub record: FileRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubCategoryView {
    pub name: String,
    pub files: Vec<IndexedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryView {
    pub cat_id: u32,
    pub name: String,
    pub sub_categories: Vec<SubCategoryView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogView {
    pub dataset: String,
    pub categories: Vec<CategoryView>,
}

/// Category ids follow sorted category names from 1. Indices restart in each
/// category and run through sub-categories by name, files by filename.
pub fn build_index(dataset: &str, grouped: &GroupedRecords) -> (CatalogView, IntegrityMap) {
    let mut integrity = IntegrityMap::new();
    let mut categories = Vec::with_capacity(grouped.len());

    for (position, (category, sub_categories)) in grouped.iter().enumerate() {
        let cat_id = position as u32 + 1;
        let mut next_index = 1u32;
        let mut views = Vec::with_capacity(sub_categories.len());

        for (sub_name, records) in sub_categories {
            let mut sorted = records.clone();
            sorted.sort_by(|a, b| a.filename.cmp(&b.filename));
            let mut files = Vec::with_capacity(sorted.len());
            for record in sorted {
                match record.integrity_signal() {
                    Some(signal) => {
                        integrity.insert(record.url.clone(), signal);
                    }
                    None => warn!(url = %record.url, "no checksum or size listed; download cannot be verified"),
                }
                files.push(IndexedFile {
                    coordinate: Coordinate {
                        category: cat_id,
                        index: next_index,
                    },
                    record,
                });
                next_index += 1;
            }
            views.push(SubCategoryView {
                name: sub_name.clone(),
                files,
            });
        }

        categories.push(CategoryView {
            cat_id,
            name: category.clone(),
            sub_categories: views,
        });
    }

    (
        CatalogView {
            dataset: dataset.to_string(),
            categories,
        },
        integrity,
    )
}

impl CatalogView {
    pub fn is_empty(&self) -> bool {
        self.files().next().is_none()
    }

    pub fn files(&self) -> impl Iterator<Item = &IndexedFile> {
        self.categories
            .iter()
            .flat_map(|category| category.sub_categories.iter())
            .flat_map(|sub| sub.files.iter())
    }

    pub fn file_at(&self, coordinate: Coordinate) -> Option<&IndexedFile> {
        self.categories
            .iter()
            .find(|category| category.cat_id == coordinate.category)?
            .sub_categories
            .iter()
            .flat_map(|sub| sub.files.iter())
            .find(|file| file.coordinate.index == coordinate.index)
    }

    pub fn category_len(&self, cat_id: u32) -> u32 {
        self.categories
            .iter()
            .find(|category| category.cat_id == cat_id)
            .map(|category| {
                category
                    .sub_categories
                    .iter()
                    .map(|sub| sub.files.len() as u32)
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn url_at(&self, coordinate: Coordinate) -> Option<&str> {
        self.file_at(coordinate).map(|file| file.record.url.as_str())
    }

    pub fn coordinate_urls(&self) -> BTreeMap<Coordinate, String> {
        self.files()
            .map(|file| (file.coordinate, file.record.url.clone()))
            .collect()
    }

    pub fn record_for_url(&self, url: &str) -> Option<&FileRecord> {
        self.files()
            .map(|file| &file.record)
            .find(|record| record.url == url)
    }

    pub fn total_size<S: AsRef<str>>(&self, urls: &[S]) -> u64 {
        urls.iter()
            .filter_map(|url| self.record_for_url(url.as_ref()))
            .filter_map(|record| record.size_in_bytes)
            .sum()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\nQUERY RESULTS FOR '{}'\n", self.dataset);
        for category in &self.categories {
            let title = format!(" [{}]: {} ", category.cat_id, category.name);
            let _ = writeln!(out, "{}", center(&title, LISTING_WIDTH, '='));
            for sub in &category.sub_categories {
                let _ = writeln!(out, "{}:", sub.name);
                for file in &sub.files {
                    let _ = writeln!(out, "{}", listing_line(file));
                }
            }
            out.push('\n');
        }
        out
    }
}

pub fn listing_line(file: &IndexedFile) -> String {
    let record = &file.record;
    let prefix = format!("{}:[{}] ", file.coordinate.category, file.coordinate.index);
    let size = record
        .display_size
        .clone()
        .or_else(|| record.size_in_bytes.map(human_size))
        .unwrap_or_else(|| "?".to_string());
    let date = record.month_year().unwrap_or_else(|| "?".to_string());
    let block = format!("[{size}|{date}]");
    let margin = LISTING_WIDTH.saturating_sub(prefix.chars().count() + block.chars().count());
    let fill = margin.saturating_sub(record.filename.chars().count());
    format!("{prefix}{}{}{block}", record.filename, "-".repeat(fill))
}

fn center(text: &str, width: usize, fill: char) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let total = width - len;
    let left = total / 2;
    let right = total - left;
    let pad = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
    format!("{}{text}{}", pad(left), pad(right))
}

pub fn human_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    let megabytes = bytes / (1024.0 * 1024.0);
    if megabytes < 1.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if megabytes < 1024.0 {
        format!("{megabytes:.2} MB")
    } else {
        format!("{:.2} GB", megabytes / 1024.0)
    }
}
