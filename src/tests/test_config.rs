use std::path::PathBuf;

use crate::config::{BehaviorConfig, DaemonConfig};
use crate::tls::{ClientAuthPolicy, TlsConfig};

#[test]
fn defaults_are_usable() {
    let config = DaemonConfig::default();

    assert_eq!(config.http_address, "127.0.0.1:1050");
    assert!(config.http_status_address.is_none());
    assert_eq!(config.cache_size, 50_000);
    assert_eq!(config.replicas, 512);
    assert!(config.tls.is_none());
    config.validate().expect("default config validates");
}

#[test]
fn instance_id_defaults_to_a_nonempty_random_value() {
    let first = DaemonConfig::default();
    let second = DaemonConfig::default();

    assert!(!first.instance_id.is_empty());
    assert!(!second.instance_id.is_empty());
    assert_ne!(first.instance_id, second.instance_id);
}

#[test]
fn advertise_falls_back_to_the_listen_address() {
    let config = DaemonConfig {
        http_address: "10.10.10.10:9000".to_string(),
        ..DaemonConfig::default()
    };
    assert_eq!(config.advertise(), "10.10.10.10:9000");

    let explicit = DaemonConfig {
        http_address: "0.0.0.0:9000".to_string(),
        advertise_address: "203.0.113.5:9000".to_string(),
        ..DaemonConfig::default()
    };
    assert_eq!(explicit.advertise(), "203.0.113.5:9000");
}

#[test]
fn invalid_configs_are_rejected() {
    let empty_address =
        DaemonConfig { http_address: String::new(), ..DaemonConfig::default() };
    assert!(empty_address.validate().is_err());

    let empty_instance =
        DaemonConfig { instance_id: String::new(), ..DaemonConfig::default() };
    assert!(empty_instance.validate().is_err());

    let no_cache = DaemonConfig { cache_size: 0, ..DaemonConfig::default() };
    assert!(no_cache.validate().is_err());

    let no_replicas = DaemonConfig { replicas: 0, ..DaemonConfig::default() };
    assert!(no_replicas.validate().is_err());

    let mut no_batches = DaemonConfig::default();
    no_batches.behaviors.batch_limit = 0;
    assert!(no_batches.validate().is_err());
}

#[test]
fn behavior_defaults_are_sane() {
    let behaviors = BehaviorConfig::default();

    assert_eq!(behaviors.batch_limit, 1_000);
    assert_eq!(behaviors.batch_timeout_ms, 500);
    assert_eq!(behaviors.global_timeout_ms, 500);
    assert!(behaviors.batch_wait_ms < behaviors.batch_timeout_ms);
    assert!(behaviors.global_sync_wait_ms < behaviors.global_timeout_ms);
}

fn path(name: &str) -> Option<PathBuf> {
    Some(PathBuf::from(format!("certs/{name}")))
}

#[test]
fn tls_with_explicit_files_validates() {
    let tls = TlsConfig {
        ca_file: path("ca.cert"),
        cert_file: path("server.pem"),
        key_file: path("server.key"),
        ..TlsConfig::default()
    };
    tls.validate().expect("explicit files validate");
}

#[test]
fn tls_auto_without_files_validates() {
    let tls = TlsConfig { auto_tls: true, ..TlsConfig::default() };
    tls.validate().expect("auto tls validates");
}

#[test]
fn tls_auto_with_signing_ca_validates() {
    let tls = TlsConfig {
        ca_file: path("ca.cert"),
        ca_key_file: path("ca.key"),
        auto_tls: true,
        ..TlsConfig::default()
    };
    tls.validate().expect("signing ca validates");
}

#[test]
fn tls_cert_without_key_is_rejected() {
    let missing_key = TlsConfig {
        cert_file: path("server.pem"),
        ..TlsConfig::default()
    };
    assert!(missing_key.validate().is_err());

    let missing_cert = TlsConfig {
        key_file: path("server.key"),
        ..TlsConfig::default()
    };
    assert!(missing_cert.validate().is_err());
}

#[test]
fn tls_ca_key_without_ca_is_rejected() {
    let tls = TlsConfig {
        ca_key_file: path("ca.key"),
        auto_tls: true,
        ..TlsConfig::default()
    };
    assert!(tls.validate().is_err());
}

#[test]
fn tls_without_material_is_rejected() {
    assert!(TlsConfig::default().validate().is_err());
}

#[test]
fn client_auth_requires_a_verification_ca() {
    let no_ca = TlsConfig {
        auto_tls: true,
        client_auth: ClientAuthPolicy::RequireAndVerifyClientCert,
        ..TlsConfig::default()
    };
    assert!(no_ca.validate().is_err());

    let with_dedicated_ca = TlsConfig {
        auto_tls: true,
        client_auth: ClientAuthPolicy::RequireAndVerifyClientCert,
        client_auth_ca_file: path("client-auth-ca.pem"),
        ..TlsConfig::default()
    };
    with_dedicated_ca.validate().expect("dedicated client ca validates");

    let with_shared_ca = TlsConfig {
        ca_file: path("ca.cert"),
        cert_file: path("server.pem"),
        key_file: path("server.key"),
        client_auth: ClientAuthPolicy::VerifyClientCertIfGiven,
        ..TlsConfig::default()
    };
    with_shared_ca.validate().expect("shared ca validates");
}

#[test]
fn daemon_config_validation_covers_tls() {
    let config = DaemonConfig {
        tls: Some(TlsConfig { cert_file: path("server.pem"), ..TlsConfig::default() }),
        ..DaemonConfig::default()
    };
    assert!(config.validate().is_err());
}
