use std::collections::BTreeSet;

use assert_matches::assert_matches;

use jgi_query::catalog::{group_records, parse_catalog};
use jgi_query::domain::Coordinate;
use jgi_query::error::QueryError;
use jgi_query::index::{CatalogView, build_index};
use jgi_query::selection::{Selection, SelectionSet, parse_selection};

fn view() -> CatalogView {
    let mut document = String::from(r#"<organismDownloads name="Org2">"#);
    for (category, count) in [("Assembly", 4), ("Annotation", 12), ("Transcripts", 2)] {
        document.push_str(&format!(r#"<folder name="{category}"><folder name="{category} files">"#));
        for i in 0..count {
            document.push_str(&format!(
                r#"<file filename="{category}_{i:02}.fa.gz" url="/Org2/download/{category}_{i:02}.fa.gz" sizeInBytes="{}" timestamp="Thu Feb 27 16:38:54 PST 2014"/>"#,
                1000 + i
            ));
        }
        document.push_str("</folder></folder>");
    }
    document.push_str("</organismDownloads>");
    let parsed = parse_catalog(&document, "test").unwrap();
    build_index("Org2", &group_records(&parsed, None)).0
}

#[test]
fn encoded_sets_parse_back_to_same_coordinates() {
    let view = view();
    let all = view
        .files()
        .map(|file| file.coordinate)
        .collect::<Vec<_>>();
    let subsets: Vec<Vec<Coordinate>> = vec![
        all.clone(),
        all.iter().copied().step_by(2).collect(),
        all.iter().copied().step_by(3).collect(),
        all.iter().copied().filter(|c| c.category == 2).collect(),
        all.iter().copied().take(5).collect(),
        vec![all[0]],
    ];

    for subset in subsets {
        let set: SelectionSet = subset.iter().copied().collect();
        let encoded = set.encode();
        let parsed = parse_selection(&encoded).unwrap();
        assert_eq!(parsed, set, "encoded as {encoded}");

        let expected = subset
            .iter()
            .map(|coordinate| view.url_at(*coordinate).unwrap().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        let resolved = Selection::Explicit(parsed).resolve(&view).unwrap();
        assert_eq!(resolved, expected);
    }
}

#[test]
fn display_matches_encode() {
    let set: SelectionSet = "2:3,1-2;1:4".parse().unwrap();
    assert_eq!(set.to_string(), "1:4;2:1-3");
}

#[test]
fn all_selects_every_url_sorted() {
    let view = view();
    let urls = Selection::All.resolve(&view).unwrap();
    assert_eq!(urls.len(), 18);
    assert!(urls.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn pattern_matches_filenames_only() {
    let view = view();
    let urls = Selection::pattern(r"^Transcripts_\d+\.fa\.gz$")
        .unwrap()
        .resolve(&view)
        .unwrap();
    assert_eq!(urls.len(), 2);

    let none = Selection::pattern("Org2/download").unwrap().resolve(&view).unwrap();
    assert!(none.is_empty());
}

#[test]
fn coordinate_outside_listing_is_rejected() {
    let view = view();
    let err = Selection::explicit("1:99").unwrap().resolve(&view).unwrap_err();
    assert_matches!(err, QueryError::UnknownCoordinate { category: 1, index: 99 });
}

#[test]
fn oversized_range_is_rejected_without_expansion() {
    let view = view();
    let err = Selection::explicit("2:1-4294967295")
        .unwrap()
        .resolve(&view)
        .unwrap_err();
    assert_matches!(err, QueryError::UnknownCoordinate { category: 2, index: 5 });

    let err = Selection::explicit("9:1-30000000")
        .unwrap()
        .resolve(&view)
        .unwrap_err();
    assert_matches!(err, QueryError::UnknownCoordinate { category: 9, index: 1 });
}

#[test]
fn range_within_category_resolves() {
    let view = view();
    let urls = Selection::explicit("2:2-4").unwrap().resolve(&view).unwrap();
    assert_eq!(
        urls,
        vec![
            "/Org2/download/Assembly_01.fa.gz",
            "/Org2/download/Assembly_02.fa.gz",
            "/Org2/download/Assembly_03.fa.gz",
        ]
    );
}
