use std::time::Duration;

use assert_matches::assert_matches;

use jgi_query::config::{Config, ConfigLoader, DEFAULT_SIGNON_URL};
use jgi_query::error::QueryError;

#[test]
fn written_config_resolves_with_overrides() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nested").join("jgi-query.json");
    let config = Config {
        user: Some("someone@example.org".to_string()),
        password: Some("secret".to_string()),
        categories: Some(vec!["Proteins".to_string()]),
        portal_url: Some("https://portal.example.org/".to_string()),
        retries: Some(5),
        ..Config::default()
    };
    ConfigLoader::write(&path, &config).unwrap();

    let resolved = ConfigLoader::resolve(Some(&path)).unwrap();
    assert_eq!(resolved.credentials.user, "someone@example.org");
    assert_eq!(resolved.categories, vec!["Proteins"]);
    assert_eq!(resolved.portal_url, "https://portal.example.org");
    assert_eq!(resolved.signon_url, DEFAULT_SIGNON_URL);
    assert_eq!(resolved.retries, 5);
    assert_eq!(resolved.timeout, Duration::from_secs(300));
}

#[test]
fn missing_file_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(QueryError::MissingConfig(ref missing)) if missing == &path
    );
}

#[test]
fn missing_password_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("jgi-query.json");
    std::fs::write(&path, r#"{ "user": "someone@example.org" }"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(QueryError::MissingCredentials(_))
    );
}

#[test]
fn invalid_json_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("jgi-query.json");
    std::fs::write(&path, "user = someone").unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(QueryError::ConfigParse(_))
    );
}
