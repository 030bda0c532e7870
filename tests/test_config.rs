use std::time::Duration;
use tapline::config::Config;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.max_head_bytes, 64 * 1024);
    assert_eq!(cfg.buffers.segment_size, 4096);
    assert_eq!(cfg.buffers.pool_capacity, 64);
    assert!(cfg.upstream.proxy.is_none());
    assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
    assert_eq!(cfg.read_timeout(), Duration::from_secs(30));
}

#[test]
fn test_config_env_overrides() {
    // One test owns the process environment to avoid races between tests.
    unsafe {
        std::env::remove_var("TAPLINE_CONFIG");
        std::env::remove_var("LISTEN");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");

    unsafe {
        std::env::set_var("LISTEN", "0.0.0.0:3000");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:3000");

    let path = std::env::temp_dir().join(format!("tapline-config-{}.yaml", std::process::id()));
    std::fs::write(&path, "server:\n  listen_addr: 127.0.0.1:9000\ntimeouts:\n  connect_secs: 3\n").unwrap();
    unsafe {
        std::env::set_var("TAPLINE_CONFIG", &path);
    }
    let cfg = Config::load().unwrap();
    // LISTEN still wins over the file
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:3000");
    assert_eq!(cfg.timeouts.connect_secs, 3);

    unsafe {
        std::env::remove_var("LISTEN");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:9000");

    unsafe {
        std::env::remove_var("TAPLINE_CONFIG");
    }
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_config_from_yaml_partial() {
    let cfg = Config::from_yaml(
        r#"
buffers:
  segment_size: 1024
upstream:
  proxy: http://10.0.0.1:3128
"#,
    )
    .unwrap();

    assert_eq!(cfg.buffers.segment_size, 1024);
    assert_eq!(cfg.buffers.pool_capacity, 64);
    assert_eq!(cfg.upstream.proxy.as_deref(), Some("http://10.0.0.1:3128"));
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
}

#[test]
fn test_config_rejects_invalid_values() {
    assert!(Config::from_yaml("buffers:\n  segment_size: 0\n").is_err());
    assert!(Config::from_yaml("timeouts:\n  connect_secs: 0\n").is_err());
    assert!(Config::from_yaml("timeouts:\n  read_secs: 0\n").is_err());
    assert!(Config::from_yaml("upstream:\n  proxy: ftp://proxy.internal\n").is_err());
    assert!(Config::from_yaml("server: [not, a, map]\n").is_err());
}

#[test]
fn test_config_missing_file_is_an_error() {
    assert!(Config::from_file("/nonexistent/tapline.yaml").is_err());
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::from_yaml("server:\n  listen_addr: 127.0.0.1:8000\n").unwrap();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.server.listen_addr, cfg2.server.listen_addr);
}
