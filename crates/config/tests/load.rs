use app_config::AppConfig;
use std::time::Duration;

#[test]
fn test_load_default_config() {
    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.db_port, 5432);
    assert_eq!(cfg.db_name, "onix_db");
    assert_eq!(cfg.http_port, 3000);
    assert_eq!(cfg.upload_timeout, Duration::from_secs(30));
    assert_eq!(cfg.session_ttl, Duration::from_secs(24 * 60 * 60));
}
