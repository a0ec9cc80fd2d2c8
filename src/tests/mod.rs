use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

use crate::bruteforcer::{EngineEvent, StopReason};
use crate::detector::CriteriaConfig;
use crate::generator::{PayloadSlot, PayloadSource, RangeFormat};
use crate::request::RequestMethod;
use crate::runner::{Options, RunReport, Runner, RunnerError};
use crate::transform::Pipeline;

fn list(name: &str, values: &[&str]) -> PayloadSlot {
    PayloadSlot::new(
        name,
        PayloadSource::Enumerated {
            values: values.iter().map(|v| v.to_string()).collect(),
        },
    )
}

fn options_for(server: &MockServer, payloads: Vec<PayloadSlot>) -> Options {
    Options {
        url: format!("{}/login", server.uri()),
        data: vec![
            ("u".to_string(), "{USER}".to_string()),
            ("p".to_string(), "{PASS}".to_string()),
        ],
        payloads,
        concurrency: 4,
        timeout: Duration::from_secs(2),
        retries: 0,
        batch_size: 16,
        criteria: CriteriaConfig {
            fail_keywords: Vec::new(),
            success_keywords: vec!["welcome".to_string()],
            smart_mode: false,
            ..CriteriaConfig::default()
        },
        auto_stop: false,
        ..Options::default()
    }
}

fn body_text(req: &Request) -> String {
    String::from_utf8_lossy(&req.body).to_string()
}

// Answers "welcome" only to form bodies containing `needle`.
async fn mount_login(server: &MockServer, needle: &'static str) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(move |req: &Request| {
            if body_text(req).contains(needle) {
                ResponseTemplate::new(200).set_body_string("welcome admin, flag{abc_123}")
            } else {
                ResponseTemplate::new(200).set_body_string("login failed")
            }
        })
        .mount(server)
        .await;
}

async fn run(options: Options) -> RunReport {
    Runner::new(options).unwrap().run().await.unwrap()
}

fn processed_pass(report: &RunReport, idx: usize) -> String {
    report.results[idx]
        .combination
        .processed("PASS")
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn finds_the_single_correct_password() {
    let server = MockServer::start().await;
    mount_login(&server, "p=correct").await;

    let options = options_for(
        &server,
        vec![list("USER", &["admin"]), list("PASS", &["wrong", "correct"])],
    );
    let report = run(options).await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(processed_pass(&report, 0), "correct");
    assert_eq!(report.stats.total, 2);
    assert_eq!(report.stats.completed, 1);
    assert_eq!(report.stats.success, 1);
    assert_eq!(report.stats.errors, 0);
    assert_eq!(
        report.stats.completed + report.stats.success + report.stats.errors,
        report.stats.total
    );
    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert!(report.flags.contains("flag{abc_123}"));
    assert_eq!(report.results[0].excerpt, "welcome admin, flag{abc_123}");
}

#[tokio::test]
async fn auto_stop_still_records_the_success() {
    let server = MockServer::start().await;
    mount_login(&server, "p=correct").await;

    let mut options = options_for(
        &server,
        vec![list("USER", &["admin"]), list("PASS", &["wrong", "correct"])],
    );
    options.auto_stop = true;
    let report = run(options).await;

    assert!(report.stats.success >= 1);
    assert!(report.stats.settled <= 2);
    assert_eq!(processed_pass(&report, 0), "correct");
}

#[tokio::test]
async fn auto_stop_with_one_worker_sends_nothing_after_the_hit() {
    let server = MockServer::start().await;
    mount_login(&server, "p=correct").await;

    let mut options = options_for(
        &server,
        vec![
            list("USER", &["admin"]),
            list("PASS", &["a", "correct", "b", "c", "d"]),
        ],
    );
    options.auto_stop = true;
    options.concurrency = 1;
    let report = run(options).await;

    let received = server.received_requests().await.unwrap_or_default();
    assert_eq!(received.len(), 2);
    assert_eq!(report.stats.completed, 1);
    assert_eq!(report.stats.success, 1);
    assert_eq!(report.stop_reason, StopReason::AutoStop);
}

#[tokio::test]
async fn timeout_then_success_counts_one_retry() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hits);
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(move |_req: &Request| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200)
                    .set_body_string("slow")
                    .set_delay(Duration::from_millis(1500))
            } else {
                ResponseTemplate::new(200).set_body_string("welcome")
            }
        })
        .mount(&server)
        .await;

    let mut options = options_for(&server, vec![list("USER", &["admin"]), list("PASS", &["x"])]);
    options.timeout = Duration::from_millis(300);
    options.retries = 1;
    let report = run(options).await;

    assert_eq!(report.stats.retried, 1);
    assert_eq!(report.stats.errors, 0);
    assert_eq!(report.stats.completed, 0);
    assert_eq!(report.stats.success, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_retries_count_as_one_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1500)))
        .mount(&server)
        .await;

    let mut options = options_for(&server, vec![list("USER", &["admin"]), list("PASS", &["x"])]);
    options.timeout = Duration::from_millis(200);
    options.retries = 2;
    let report = run(options).await;

    assert_eq!(report.stats.retried, 2);
    assert_eq!(report.stats.errors, 1);
    assert_eq!(report.stats.completed, 1);
    assert!(report.results.is_empty());
}

#[tokio::test]
async fn smart_mode_flags_a_deviating_length() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(|req: &Request| {
            if body_text(req).contains("p=right") {
                ResponseTemplate::new(200).set_body_string("x".repeat(300))
            } else {
                ResponseTemplate::new(200).set_body_string("nope")
            }
        })
        .mount(&server)
        .await;

    let mut options = options_for(
        &server,
        vec![list("USER", &["admin"]), list("PASS", &["a", "b", "right"])],
    );
    options.concurrency = 1;
    options.criteria = CriteriaConfig {
        fail_keywords: Vec::new(),
        smart_mode: true,
        ..CriteriaConfig::default()
    };
    let report = run(options).await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(processed_pass(&report, 0), "right");
    assert_eq!(report.stats.baseline, Some(4));
}

#[tokio::test]
async fn processed_values_are_sent_not_originals() {
    let server = MockServer::start().await;
    // admin:correct in base64, '=' form-encoded
    mount_login(&server, "p=YWRtaW46Y29ycmVjdA%3D%3D").await;

    let pass = list("PASS", &["wrong", "correct"])
        .with_pipeline(Pipeline::parse_list(&["prefix=admin:", "base64"]).unwrap());
    let options = options_for(&server, vec![list("USER", &["admin"]), pass]);
    let report = run(options).await;

    assert_eq!(report.results.len(), 1);
    let candidate = report.results[0].combination.get("PASS").unwrap();
    assert_eq!(candidate.original, "correct");
    assert_eq!(candidate.processed, "YWRtaW46Y29ycmVjdA==");
}

#[tokio::test]
async fn dictionary_and_range_slots_cover_the_product() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(|req: &Request| {
            let body = body_text(req);
            if body.contains("u=user01") && body.contains("p=correct") {
                ResponseTemplate::new(200).set_body_string("welcome")
            } else {
                ResponseTemplate::new(403).set_body_string("denied")
            }
        })
        .mount(&server)
        .await;

    let dict = std::env::temp_dir().join(format!("brutex-e2e-dict-{}.txt", std::process::id()));
    std::fs::write(&dict, "  \nwrong\n\n correct \n").unwrap();

    let user = PayloadSlot::new(
        "USER",
        PayloadSource::Range {
            start: 0,
            end: 2,
            step: 1,
            format: RangeFormat::parse("user{:02}").unwrap(),
        },
    );
    let pass = PayloadSlot::new("PASS", PayloadSource::Dictionary { path: dict.clone() });
    let options = options_for(&server, vec![user, pass]);
    let report = run(options).await;
    let _ = std::fs::remove_file(&dict);

    assert_eq!(report.stats.total, 6);
    assert_eq!(report.stats.completed, 5);
    assert_eq!(report.stats.settled, 6);
    assert_eq!(report.results.len(), 1);
    assert_eq!(
        report.results[0].combination.processed("USER"),
        Some("user01")
    );
}

#[tokio::test]
async fn json_and_get_methods_shape_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(|req: &Request| {
            let value: serde_json::Value = serde_json::from_slice(&req.body).unwrap_or_default();
            if value["p"] == "correct" && value["u"] == "admin" {
                ResponseTemplate::new(200).set_body_string("welcome")
            } else {
                ResponseTemplate::new(200).set_body_string("no")
            }
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(|req: &Request| {
            let hit = req
                .url
                .query_pairs()
                .any(|(k, v)| k == "p" && v == "correct");
            ResponseTemplate::new(200).set_body_string(if hit { "welcome" } else { "no" })
        })
        .mount(&server)
        .await;

    for method in [RequestMethod::Json, RequestMethod::Get] {
        let mut options = options_for(
            &server,
            vec![list("USER", &["admin"]), list("PASS", &["a", "correct"])],
        );
        options.method = method;
        let report = run(options).await;
        assert_eq!(report.results.len(), 1, "method {method}");
        assert_eq!(processed_pass(&report, 0), "correct");
    }
}

#[tokio::test]
async fn headers_and_cookies_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("x-token", "abc"))
        .and(header("cookie", "sid=1; lang=en"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .mount(&server)
        .await;

    let mut options = options_for(&server, vec![list("USER", &["admin"]), list("PASS", &["x"])]);
    options.headers.push(("X-Token".to_string(), "abc".to_string()));
    options.cookies = vec![
        ("sid".to_string(), "1".to_string()),
        ("lang".to_string(), "en".to_string()),
    ];
    let report = run(options).await;
    assert_eq!(report.stats.success, 1);
}

#[tokio::test]
async fn missing_dictionary_sends_no_traffic() {
    let server = MockServer::start().await;
    mount_login(&server, "p=correct").await;

    let options = options_for(
        &server,
        vec![
            list("USER", &["admin"]),
            PayloadSlot::new(
                "PASS",
                PayloadSource::Dictionary {
                    path: std::env::temp_dir().join("brutex-e2e-missing.txt"),
                },
            ),
        ],
    );
    let err = Runner::new(options).unwrap().prepare().await.err().unwrap();
    assert!(matches!(err, RunnerError::Generator(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn interruption_stops_dispatch_and_reports() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("no"))
        .mount(&server)
        .await;

    let mut options = options_for(
        &server,
        vec![list("USER", &["admin"]), list("PASS", &["1", "2", "3", "4", "5", "6"])],
    );
    options.concurrency = 1;
    let prepared = Runner::new(options).unwrap().prepare().await.unwrap();
    let mut batches = 0;
    let report = prepared
        .execute(std::future::ready(()), |event: EngineEvent<'_>| {
            if let EngineEvent::Batch(_) = event {
                batches += 1;
            }
        })
        .await;

    assert_eq!(report.stop_reason, StopReason::Interrupted);
    assert!(report.stats.settled <= 1);
    assert_eq!(batches, 1);
}

#[tokio::test]
async fn progress_events_follow_each_batch() {
    let server = MockServer::start().await;
    mount_login(&server, "p=correct").await;

    let mut options = options_for(
        &server,
        vec![list("USER", &["admin"]), list("PASS", &["1", "2", "3", "4", "correct"])],
    );
    options.batch_size = 2;
    let prepared = Runner::new(options).unwrap().prepare().await.unwrap();
    let mut settled_per_batch = Vec::new();
    let mut hits = 0;
    let report = prepared
        .execute(std::future::pending::<()>(), |event: EngineEvent<'_>| match event {
            EngineEvent::Batch(snapshot) => settled_per_batch.push(snapshot.settled),
            EngineEvent::Hit(_) => hits += 1,
        })
        .await;

    assert_eq!(settled_per_batch, vec![2, 4, 5]);
    assert_eq!(hits, 1);
    assert_eq!(report.stats.completed, 4);
    assert_eq!(report.stats.success, 1);
}

async fn mount_counting(server: &MockServer, delay: Duration) -> Arc<std::sync::Mutex<Vec<std::time::Instant>>> {
    let arrivals = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = Arc::clone(&arrivals);
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(move |_req: &Request| {
            log.lock().unwrap().push(std::time::Instant::now());
            ResponseTemplate::new(200)
                .set_body_string("no")
                .set_delay(delay)
        })
        .mount(server)
        .await;
    arrivals
}

#[tokio::test]
async fn runs_end_when_total_is_not_a_batch_multiple() {
    for (users, passes) in [(vec!["admin"], vec!["x"]), (vec!["a", "b"], vec!["1", "2", "3"])] {
        let server = MockServer::start().await;
        mount_login(&server, "p=never").await;

        let mut options = options_for(&server, vec![list("USER", &users), list("PASS", &passes)]);
        options.batch_size = 4;
        let report = tokio::time::timeout(Duration::from_secs(10), run(options))
            .await
            .expect("run did not finish");

        let total = (users.len() * passes.len()) as u64;
        let received = server.received_requests().await.unwrap_or_default();
        assert_eq!(received.len() as u64, total);
        assert_eq!(report.stats.total, total);
        assert_eq!(report.stats.completed, total);
        assert_eq!(report.stop_reason, StopReason::Exhausted);
    }
}

#[tokio::test]
async fn in_flight_requests_never_exceed_concurrency() {
    let server = MockServer::start().await;
    let delay = Duration::from_millis(300);
    let arrivals = mount_counting(&server, delay).await;

    let mut options = options_for(
        &server,
        vec![list("USER", &["admin"]), list("PASS", &["1", "2", "3", "4", "5", "6"])],
    );
    options.concurrency = 2;
    let report = run(options).await;
    assert_eq!(report.stats.completed, 6);

    // a slot frees only after its response arrives, so any window shorter than
    // the delay holds at most `concurrency` arrivals
    let mut times = arrivals.lock().unwrap().clone();
    times.sort();
    let window = delay - Duration::from_millis(50);
    let peak = times
        .iter()
        .map(|start| times.iter().filter(|t| **t >= *start && **t - *start < window).count())
        .max()
        .unwrap_or(0);
    assert!(peak <= 2, "peak in flight was {peak}");
    assert!(times[5] - times[0] >= delay * 2);
}

#[tokio::test]
async fn rate_limit_spaces_out_requests() {
    let server = MockServer::start().await;
    let arrivals = mount_counting(&server, Duration::ZERO).await;

    let mut options = options_for(
        &server,
        vec![list("USER", &["admin"]), list("PASS", &["1", "2", "3", "4", "5", "6"])],
    );
    options.concurrency = 6;
    options.rate = Some(10);
    let started = std::time::Instant::now();
    let report = run(options).await;
    let elapsed = started.elapsed();

    assert_eq!(report.stats.completed, 6);
    assert_eq!(arrivals.lock().unwrap().len(), 6);
    // six requests at 10/s need at least five 100ms gaps
    assert!(elapsed >= Duration::from_millis(450), "took {elapsed:?}");
}
