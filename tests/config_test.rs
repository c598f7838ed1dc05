use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hitime_oauth::oauth_core::config::signing_key_from_lookup;
use hitime_oauth::{AuthConfig, ConfigError, JWTAlgorithm};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let config = AuthConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.algorithm, JWTAlgorithm::HS256);
    assert_eq!(config.access_token_ttl, 3600);
    assert_eq!(config.code_ttl, 120);
    assert_eq!(config.refresh_token_ttl, 30 * 24 * 3600);
}

#[test]
fn test_from_json_fills_missing_fields() {
    let config = AuthConfig::from_json(r#"{ "algorithm": "HS512", "code_ttl": 60 }"#).unwrap();
    assert_eq!(config.algorithm, JWTAlgorithm::HS512);
    assert_eq!(config.code_ttl, 60);
    assert_eq!(config.access_token_ttl, 3600);
}

#[test]
fn test_from_json_rejects_bad_input() {
    assert!(matches!(AuthConfig::from_json("{ nope"), Err(ConfigError::Parse(_))));
    assert!(matches!(
        AuthConfig::from_json(r#"{ "code_ttl": 600 }"#),
        Err(ConfigError::InvalidValue { field: "code_ttl", .. })
    ));
    assert!(matches!(
        AuthConfig::from_json(r#"{ "access_token_ttl": 7200 }"#),
        Err(ConfigError::InvalidValue { field: "key_grace_period", .. })
    ));
}

#[test]
fn test_from_lookup_reads_prefixed_variables() {
    let config = AuthConfig::from_lookup(lookup(&[
        ("HITIME_OAUTH_ALGORITHM", "hs384"),
        ("HITIME_OAUTH_ACCESS_TTL", "900"),
        ("HITIME_OAUTH_CODE_TTL", " 90 "),
        ("HITIME_OAUTH_CLOCK_SKEW", "10"),
    ]))
    .unwrap();
    assert_eq!(config.algorithm, JWTAlgorithm::HS384);
    assert_eq!(config.access_token_ttl, 900);
    assert_eq!(config.code_ttl, 90);
    // Grace period follows the access lifetime unless set explicitly.
    assert_eq!(config.key_grace_period, 910);
}

#[test]
fn test_from_lookup_errors() {
    assert!(matches!(
        AuthConfig::from_lookup(lookup(&[("HITIME_OAUTH_ALGORITHM", "RS256")])),
        Err(ConfigError::InvalidValue { field: "algorithm", .. })
    ));
    assert!(matches!(
        AuthConfig::from_lookup(lookup(&[("HITIME_OAUTH_ACCESS_TTL", "soon")])),
        Err(ConfigError::InvalidValue { field: "access_token_ttl", .. })
    ));
    assert!(matches!(
        AuthConfig::from_lookup(lookup(&[("HITIME_OAUTH_KEY_GRACE_PERIOD", "5")])),
        Err(ConfigError::InvalidValue { field: "key_grace_period", .. })
    ));
    assert!(matches!(
        AuthConfig::from_lookup(lookup(&[("HITIME_OAUTH_SWEEP_INTERVAL", "0")])),
        Err(ConfigError::InvalidValue { field: "sweep_interval", .. })
    ));
}

#[test]
fn test_signing_key_from_lookup() {
    let encoded = STANDARD.encode([3u8; 32]);
    let key = signing_key_from_lookup(lookup(&[
        ("HITIME_OAUTH_SIGNING_KEY", encoded.as_str()),
        ("HITIME_OAUTH_SIGNING_KEY_ID", "2026-10"),
    ]))
    .unwrap();
    assert_eq!(key.kid(), "2026-10");

    let generated = signing_key_from_lookup(lookup(&[])).unwrap();
    assert_eq!(generated.kid(), "primary");

    let short = STANDARD.encode([3u8; 16]);
    assert!(matches!(
        signing_key_from_lookup(lookup(&[("HITIME_OAUTH_SIGNING_KEY", short.as_str())])),
        Err(ConfigError::WeakKey { len: 16 })
    ));
    assert!(matches!(
        signing_key_from_lookup(lookup(&[("HITIME_OAUTH_SIGNING_KEY", "***")])),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_oversized_durations_are_rejected() {
    let max = u64::MAX.to_string();
    assert!(matches!(
        AuthConfig::from_lookup(lookup(&[("HITIME_OAUTH_ACCESS_TTL", max.as_str())])),
        Err(ConfigError::InvalidValue { field: "access_token_ttl", .. })
    ));
    assert!(matches!(
        AuthConfig::from_lookup(lookup(&[
            ("HITIME_OAUTH_ACCESS_TTL", max.as_str()),
            ("HITIME_OAUTH_KEY_GRACE_PERIOD", max.as_str()),
        ])),
        Err(ConfigError::InvalidValue { field: "access_token_ttl", .. })
    ));

    let huge = 1u64 << 63;
    let config = AuthConfig { access_token_ttl: huge, key_grace_period: huge, ..AuthConfig::default() };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { field: "access_token_ttl", .. })));
    assert!(matches!(
        AuthConfig::from_json(r#"{ "refresh_token_ttl": 9223372036854775808 }"#),
        Err(ConfigError::InvalidValue { field: "refresh_token_ttl", .. })
    ));

    let longest = AuthConfig {
        access_token_ttl: AuthConfig::MAX_DURATION - 30,
        refresh_token_ttl: AuthConfig::MAX_DURATION,
        key_grace_period: AuthConfig::MAX_DURATION,
        ..AuthConfig::default()
    };
    assert!(longest.validate().is_ok());
}
