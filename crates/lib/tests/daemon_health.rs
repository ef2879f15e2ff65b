//! Integration test: start the daemon on a free port, GET /, assert health
//! JSON, and POST a webhook update. Does not require a Telegram token. The
//! server task is left running when the test ends.

use lib::config::Config;
use lib::daemon;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn temp_config_dir() -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!("chatrep-daemon-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create config dir");
    let config_path = dir.join("config.json");
    std::fs::File::create(&config_path)
        .and_then(|mut f| f.write_all(b"{}"))
        .expect("write config.json");
    std::fs::write(
        dir.join("rules.json"),
        br#"[["ubot", "bot gacor", "contains"]]"#,
    )
    .expect("write rules.json");
    (dir, config_path)
}

#[tokio::test]
async fn daemon_health_http_responds_with_running() {
    let port = free_port();
    let (_temp_dir, config_path) = temp_config_dir();

    let mut config = Config::default();
    config.daemon.port = port;
    config.daemon.bind = "127.0.0.1".to_string();

    let daemon_handle = tokio::spawn(async move {
        let _ = daemon::run_daemon(config, config_path).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let json: serde_json::Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port as u64));
                assert_eq!(json.get("rules").and_then(|v| v.as_u64()), Some(1));

                // A webhook update for a disabled conversation is accepted
                // and quietly suppressed.
                let update = serde_json::json!({
                    "update_id": 1,
                    "message": {
                        "message_id": 42,
                        "chat": {"id": -100123, "type": "supergroup", "title": "Grup A"},
                        "from": {"id": 7, "first_name": "Ari", "username": "arioke"},
                        "text": "ada ubot disini"
                    }
                });
                let resp = client
                    .post(format!("http://127.0.0.1:{}/telegram/webhook", port))
                    .json(&update)
                    .send()
                    .await
                    .expect("post webhook");
                assert!(resp.status().is_success());
                return;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let _ = daemon_handle.abort();
    panic!(
        "GET {} did not return 200 with health JSON within 5s; last error: {:?}",
        url, last_err
    );
}
