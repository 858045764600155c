use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::{debug, warn};

use crate::dedup::uniqueify;
use crate::domain::{FileAttributes, FileRecord};
use crate::error::QueryError;

const FOLDER: &[u8] = b"folder";
const FILE: &[u8] = b"file";
const PATH_SEPARATOR: &str = ":";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCatalog {
    pub dataset_name: Option<String>,
    pub files_by_path: BTreeMap<String, Vec<FileAttributes>>,
}

pub type GroupedRecords = BTreeMap<String, BTreeMap<String, Vec<FileRecord>>>;

pub fn parse_catalog(document: &str, address: &str) -> Result<ParsedCatalog, QueryError> {
    let parse_error = |message: String| QueryError::CatalogParse {
        message,
        address: address.to_string(),
    };

    let mut reader = Reader::from_str(document);
    let mut parsed = ParsedCatalog::default();
    let mut folders: Vec<String> = Vec::new();
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| parse_error(format!("{err} at byte {}", reader.buffer_position())))?;
        match event {
            Event::Start(element) => {
                if depth == 0 {
                    if saw_root {
                        return Err(parse_error("multiple root elements".to_string()));
                    }
                    saw_root = true;
                    parsed.dataset_name =
                        attribute(&reader, &element, "name").map_err(parse_error)?;
                }
                depth += 1;
                match element.name().as_ref() {
                    FOLDER => folders.push(
                        attribute(&reader, &element, "name")
                            .map_err(parse_error)?
                            .unwrap_or_default(),
                    ),
                    FILE => {
                        record_file(&reader, &element, &folders, &mut parsed)
                            .map_err(parse_error)?
                    }
                    _ => {}
                }
            }
            Event::Empty(element) => {
                if depth == 0 {
                    if saw_root {
                        return Err(parse_error("multiple root elements".to_string()));
                    }
                    saw_root = true;
                    parsed.dataset_name =
                        attribute(&reader, &element, "name").map_err(parse_error)?;
                }
                if element.name().as_ref() == FILE {
                    record_file(&reader, &element, &folders, &mut parsed).map_err(parse_error)?;
                }
            }
            Event::End(element) => {
                depth = depth.saturating_sub(1);
                if element.name().as_ref() == FOLDER {
                    folders.pop();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(parse_error("empty catalog document".to_string()));
    }
    if depth != 0 {
        return Err(parse_error("unexpected end of document".to_string()));
    }
    Ok(parsed)
}

fn attribute(
    reader: &Reader<&[u8]>,
    element: &BytesStart<'_>,
    key: &str,
) -> Result<Option<String>, String> {
    Ok(attributes(reader, element)?.remove(key))
}

fn attributes(reader: &Reader<&[u8]>, element: &BytesStart<'_>) -> Result<FileAttributes, String> {
    let mut out = FileAttributes::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|err| err.to_string())?;
        out.insert(key, value.into_owned());
    }
    Ok(out)
}

fn record_file(
    reader: &Reader<&[u8]>,
    element: &BytesStart<'_>,
    folders: &[String],
    parsed: &mut ParsedCatalog,
) -> Result<(), String> {
    let attrs = attributes(reader, element)?;
    parsed
        .files_by_path
        .entry(folders.join(PATH_SEPARATOR))
        .or_default()
        .push(attrs);
    Ok(())
}

pub fn path_layers(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR)
        .filter(|layer| !layer.is_empty())
        .collect()
}

/// The category is the second-to-last path layer and the sub-category the
/// last; a single-layer path uses that layer for both.
pub fn group_records(parsed: &ParsedCatalog, allow_list: Option<&[String]>) -> GroupedRecords {
    let mut grouped = GroupedRecords::new();
    for (path, attribute_sets) in &parsed.files_by_path {
        let layers = path_layers(path);
        if let Some(allowed) = allow_list {
            if !layers
                .iter()
                .any(|layer| allowed.iter().any(|name| name == layer))
            {
                debug!(path = %path, "dropping catalog path outside category allow-list");
                continue;
            }
        }
        let (category, sub_category) = match layers.as_slice() {
            [] => {
                warn!(files = attribute_sets.len(), "skipping files outside any folder");
                continue;
            }
            [only] => (*only, *only),
            [.., category, sub_category] => (*category, *sub_category),
        };

        let records = attribute_sets
            .iter()
            .filter_map(|attrs| {
                let record = FileRecord::from_attributes(attrs);
                if record.is_none() {
                    debug!(path = %path, "skipping file node without filename or url");
                }
                record
            })
            .collect::<Vec<_>>();

        grouped
            .entry(category.to_string())
            .or_default()
            .entry(sub_category.to_string())
            .or_default()
            .extend(records);
    }

    for sub_categories in grouped.values_mut() {
        for records in sub_categories.values_mut() {
            *records = uniqueify(std::mem::take(records));
        }
        sub_categories.retain(|_, records| !records.is_empty());
    }
    grouped.retain(|_, sub_categories| !sub_categories.is_empty());
    grouped
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const NESTED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<organismDownloads name="Nemve1">
  <folder name="Files">
    <folder name="Annotation">
      <folder name="Genes">
        <file filename="genes.gff.gz" url="/Nemve1/genes.gff.gz" size="20 MB" sizeInBytes="20000000" timestamp="Thu Feb 27 16:38:54 PST 2014"/>
      </folder>
    </folder>
    <folder name="Additional Files">
      <file filename="extra.txt.gz" url="/Nemve1/extra.txt.gz" timestamp="Thu Feb 27 16:38:54 PST 2014"/>
    </folder>
  </folder>
</organismDownloads>"#;

    #[test]
    fn stack_tracks_nesting() {
        let parsed = parse_catalog(NESTED, "addr").unwrap();
        assert_eq!(parsed.dataset_name.as_deref(), Some("Nemve1"));
        let keys = parsed.files_by_path.keys().cloned().collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                "Files:Additional Files".to_string(),
                "Files:Annotation:Genes".to_string()
            ]
        );
    }

    #[test]
    fn grouping_uses_last_two_layers() {
        let parsed = parse_catalog(NESTED, "addr").unwrap();
        let grouped = group_records(&parsed, None);
        assert!(grouped["Annotation"].contains_key("Genes"));
        assert!(grouped["Files"].contains_key("Additional Files"));
    }

    #[test]
    fn single_layer_is_both_category_and_sub_category() {
        let doc = r#"<root name="x"><folder name="Solo"><file filename="a" url="/a" timestamp="Thu Feb 27 16:38:54 PST 2014"/></folder></root>"#;
        let grouped = group_records(&parse_catalog(doc, "addr").unwrap(), None);
        assert_eq!(grouped["Solo"]["Solo"].len(), 1);
    }

    #[test]
    fn allow_list_drops_unrelated_paths() {
        let parsed = parse_catalog(NESTED, "addr").unwrap();
        let allow = vec!["Genes".to_string()];
        let grouped = group_records(&parsed, Some(&allow));
        assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["Annotation"]);
    }

    #[test]
    fn malformed_document_is_catalog_error() {
        let err = parse_catalog("<root><folder name='a'></root>", "http://x").unwrap_err();
        assert_matches!(err, QueryError::CatalogParse { ref address, .. } if address == "http://x");
    }

    #[test]
    fn empty_document_is_catalog_error() {
        let err = parse_catalog("   ", "http://x").unwrap_err();
        assert_matches!(err, QueryError::CatalogParse { .. });
    }

    #[test]
    fn repeated_calls_do_not_share_state() {
        let first = parse_catalog(NESTED, "addr").unwrap();
        let second = parse_catalog(NESTED, "addr").unwrap();
        assert_eq!(first, second);
        assert_eq!(second.files_by_path.values().map(Vec::len).sum::<usize>(), 2);
    }
}
