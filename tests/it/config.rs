//! Configuration loading from the environment. Serialized via `serial_test`
//! since `std::env::set_var`/`remove_var` mutate global process state that
//! would otherwise race across parallel test threads.

use std::env;

use dsx_connect_worker::config::{AppEnv, Config};
use serial_test::serial;

const ENV_VARS: &[&str] = &[
    "DSXCONNECT_APP_ENV",
    "DSXCONNECT_REDIS_URL",
    "DSXCONNECT_SCANNER__BASE_URL",
    "DSXCONNECT_SCANNER__MAX_INFLIGHT",
    "DSXCONNECT_WORKERS__SCAN_REQUEST_MAX_RETRIES",
    "DSXCONNECT_DIANNA__INDEX_RETAIN_DAYS",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn from_env_applies_documented_defaults_when_unset() {
    clear_env();
    let config = Config::from_env().expect("defaults must always parse");
    assert_eq!(config.app_env(), AppEnv::Dev);
    assert_eq!(config.redis_url(), "redis://localhost:6379/3");
    assert_eq!(config.scanner().base_url(), "http://0.0.0.0:5000");
    assert_eq!(config.scanner().max_inflight(), 2048);
    assert_eq!(config.workers().scan_request_max_retries(), 1);
    assert_eq!(config.redis().index_retain_days(), 90);
    clear_env();
}

#[test]
#[serial]
fn from_env_honors_explicit_overrides() {
    clear_env();
    env::set_var("DSXCONNECT_APP_ENV", "prod");
    env::set_var("DSXCONNECT_SCANNER__BASE_URL", "http://dsxa.internal:5000");
    env::set_var("DSXCONNECT_SCANNER__MAX_INFLIGHT", "4");
    env::set_var("DSXCONNECT_WORKERS__SCAN_REQUEST_MAX_RETRIES", "3");

    let config = Config::from_env().expect("overrides must parse");
    assert_eq!(config.app_env(), AppEnv::Prod);
    assert_eq!(config.scanner().base_url(), "http://dsxa.internal:5000");
    assert_eq!(config.scanner().max_inflight(), 4);
    assert_eq!(config.workers().scan_request_max_retries(), 3);

    clear_env();
}

#[test]
#[serial]
fn from_env_rejects_unparseable_numeric_override() {
    clear_env();
    env::set_var("DSXCONNECT_SCANNER__MAX_INFLIGHT", "not-a-number");
    let result = Config::from_env();
    assert!(result.is_err());
    clear_env();
}
