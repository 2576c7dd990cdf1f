use chrono::{TimeZone, Utc};
use prometheus::Registry;
use tokio::io::AsyncReadExt;

use streamagg::config::{InitOption, OptionValue};
use streamagg::metrics::Metrics;
use streamagg::protocol::{InitRequest, Keepalive, Request, Response, RestoreRequest};
use streamagg::recovery::CheckpointStore;
use streamagg::{run_agent, AggError, AgentOptions, Engine, Mode, Point};

fn line(request: &Request) -> String {
    serde_json::to_string(request).unwrap() + "\n"
}

fn init(options: Vec<InitOption>) -> String {
    line(&Request::Init(InitRequest { options }))
}

fn point(host: &str, secs: i64, value: f64) -> String {
    let point = Point::new("cpu", Utc.timestamp_opt(secs, 0).unwrap())
        .with_tag("host", host)
        .with_double("value", value);
    line(&Request::Point(point))
}

fn smoothing() -> String {
    init(vec![
        InitOption::new("field", OptionValue::String("value".into())),
        InitOption::new("as", OptionValue::String("avg".into())),
        InitOption::new("size", OptionValue::Int(3)),
        InitOption::new("alpha", OptionValue::Double(0.5)),
    ])
}

fn batching(size: i64, period_secs: i64) -> String {
    init(vec![
        InitOption::new("field", OptionValue::String("value".into())),
        InitOption::new("as", OptionValue::String("value".into())),
        InitOption::new("size", OptionValue::Int(size)),
        InitOption::new(
            "period",
            OptionValue::Duration(period_secs * 1_000_000_000),
        ),
    ])
}

async fn drive_with(
    mode: Mode,
    input: &str,
    checkpoints: Option<CheckpointStore>,
    options: AgentOptions,
) -> Vec<Response> {
    let metrics = Metrics::new(&Registry::new()).unwrap();
    let (writer, mut reader) = tokio::io::duplex(1 << 20);
    run_agent(
        Engine::new(mode, metrics),
        input.as_bytes(),
        writer,
        checkpoints,
        options,
    )
    .await
    .unwrap();

    let mut output = String::new();
    reader.read_to_string(&mut output).await.unwrap();
    output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

async fn drive(mode: Mode, input: &str) -> Vec<Response> {
    drive_with(mode, input, None, AgentOptions::default()).await
}

fn averages(responses: &[Response]) -> Vec<f64> {
    responses
        .iter()
        .filter_map(|response| match response {
            Response::Point(p) => Some(p.fields_double["avg"]),
            _ => None,
        })
        .collect()
}

fn temp_db() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("streamagg-agent-{}", fastrand::u64(..)));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("checkpoints.sqlite3")
}

#[tokio::test]
async fn smoothing_scenario() {
    let input = [
        smoothing(),
        point("a", 0, 10.0),
        point("a", 1, 20.0),
        point("a", 2, 30.0),
        point("a", 3, 40.0),
    ]
    .concat();
    let responses = drive(Mode::MovingAverage, &input).await;

    assert!(matches!(&responses[0], Response::Init(init) if init.success));
    assert_eq!(averages(&responses), vec![5.0, 12.5, 21.25, 30.0]);
    match &responses[1] {
        Response::Point(p) => {
            assert_eq!(p.name, "cpu");
            assert_eq!(p.tags["host"], "a");
            assert_eq!(p.fields_double.len(), 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn groups_smooth_independently() {
    let input = [
        smoothing(),
        point("a", 0, 10.0),
        point("b", 0, 100.0),
        point("a", 1, 20.0),
    ]
    .concat();
    let responses = drive(Mode::MovingAverage, &input).await;
    assert_eq!(averages(&responses), vec![5.0, 50.0, 12.5]);
}

#[tokio::test]
async fn failed_init_rejects_points() {
    let input = [
        init(vec![InitOption::new("alpha", OptionValue::Double(0.0))]),
        point("a", 0, 10.0),
    ]
    .concat();
    let responses = drive(Mode::MovingAverage, &input).await;
    match responses.as_slice() {
        [Response::Init(init), Response::Error(err)] => {
            assert!(!init.success);
            assert!(init.error.contains("must supply field"));
            assert!(err.error.contains("before a successful init"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn size_trigger_emits_envelope() {
    let input = [
        batching(2, 0),
        point("g", 1, 1.0),
        point("g", 2, 2.0),
        point("g", 3, 3.0),
    ]
    .concat();
    let responses = drive(Mode::Batch, &input).await;
    match responses.as_slice() {
        [Response::Init(_), Response::Begin(begin), Response::Point(a), Response::Point(b), Response::End(end)] =>
        {
            assert_eq!(begin.size, 2);
            assert_eq!(begin.group.0, "host=g");
            assert_eq!(begin.tags["host"], "g");
            assert_eq!(a.fields_double["value"], 1.0);
            assert_eq!(b.fields_double["value"], 2.0);
            assert_eq!(end.tmax, Utc.timestamp_opt(2, 0).unwrap());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn deadline_flushes_every_group() {
    let input = [
        batching(0, 10),
        point("a", 0, 1.0),
        point("b", 5, 2.0),
        point("a", 10, 3.0),
    ]
    .concat();
    let responses = drive(Mode::Batch, &input).await;
    let groups: Vec<_> = responses
        .iter()
        .filter_map(|response| match response {
            Response::Begin(begin) => Some(begin.group.0.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(groups, vec!["host=a", "host=b"]);
    assert_eq!(responses.len(), 1 + 2 * 3);
}

#[tokio::test]
async fn protocol_errors_are_not_fatal() {
    let input = [
        "not json\n".to_owned(),
        "\n".to_owned(),
        line(&Request::Keepalive(Keepalive { time: 7 })),
        smoothing(),
        r#"{"begin": {"group": "g", "size": 1}}"#.to_owned() + "\n",
        line(&Request::Info),
    ]
    .concat();
    let responses = drive(Mode::MovingAverage, &input).await;
    assert_eq!(responses.len(), 5);
    assert!(matches!(&responses[0], Response::Error(_)));
    assert_eq!(responses[1], Response::Keepalive(Keepalive { time: 7 }));
    match &responses[3] {
        Response::Error(err) => assert!(err.error.contains("unsupported")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(&responses[4], Response::Info(_)));
}

#[tokio::test]
async fn snapshot_then_restore_resumes() {
    let first = [
        smoothing(),
        point("a", 0, 10.0),
        point("a", 1, 20.0),
        line(&Request::Snapshot),
        point("a", 2, 30.0),
    ]
    .concat();
    let responses = drive(Mode::MovingAverage, &first).await;
    let snapshot = responses
        .iter()
        .find_map(|response| match response {
            Response::Snapshot(s) => Some(s.snapshot.clone()),
            _ => None,
        })
        .unwrap();
    let expected = *averages(&responses).last().unwrap();

    let second = [
        smoothing(),
        line(&Request::Restore(RestoreRequest { snapshot })),
        point("a", 2, 30.0),
    ]
    .concat();
    let responses = drive(Mode::MovingAverage, &second).await;
    assert!(matches!(&responses[1], Response::Restore(r) if r.success));
    assert_eq!(averages(&responses), vec![expected]);
}

#[tokio::test]
async fn durable_checkpoint_survives_restart() {
    let db = temp_db();
    let options = AgentOptions {
        queue_capacity: 4,
        checkpoint_every: 2,
    };

    let first = [
        batching(5, 0),
        point("g", 1, 1.0),
        point("g", 2, 2.0),
    ]
    .concat();
    let store = CheckpointStore::open(&db).unwrap();
    let responses = drive_with(Mode::Batch, &first, Some(store), options).await;
    assert_eq!(responses.len(), 1);

    // Three more points fill the restored buffer of two.
    let second = [
        batching(5, 0),
        point("g", 3, 3.0),
        point("g", 4, 4.0),
        point("g", 5, 5.0),
        point("g", 6, 6.0),
    ]
    .concat();
    let store = CheckpointStore::open(&db).unwrap();
    let responses = drive_with(Mode::Batch, &second, Some(store), options).await;
    match &responses[1] {
        Response::Begin(begin) => assert_eq!(begin.size, 5),
        other => panic!("unexpected {other:?}"),
    }
    if let Some(dir) = db.parent() {
        std::fs::remove_dir_all(dir).unwrap();
    }
}

#[tokio::test]
async fn reinit_does_not_reload_checkpoint() {
    let db = temp_db();
    let options = AgentOptions {
        queue_capacity: 4,
        checkpoint_every: 2,
    };

    let first = [batching(3, 0), point("g", 1, 1.0), point("g", 2, 2.0)].concat();
    let store = CheckpointStore::open(&db).unwrap();
    drive_with(Mode::Batch, &first, Some(store), options).await;

    // The first init resumes two buffered points, the second drops
    // them. Three fresh points then fit without a flush.
    let second = [
        batching(3, 0),
        batching(3, 0),
        point("g", 3, 3.0),
        point("g", 4, 4.0),
        point("g", 5, 5.0),
    ]
    .concat();
    let store = CheckpointStore::open(&db).unwrap();
    let responses = drive_with(Mode::Batch, &second, Some(store), options).await;
    assert_eq!(responses.len(), 2);
    assert!(responses
        .iter()
        .all(|r| matches!(r, Response::Init(init) if init.success)));
    if let Some(dir) = db.parent() {
        std::fs::remove_dir_all(dir).unwrap();
    }
}

#[tokio::test]
async fn rejected_points_do_not_count_toward_checkpoints() {
    let db = temp_db();
    let options = AgentOptions {
        queue_capacity: 4,
        checkpoint_every: 2,
    };
    let missing_field = line(&Request::Point(
        Point::new("cpu", Utc.timestamp_opt(1, 0).unwrap()).with_tag("host", "a"),
    ));

    let first = [smoothing(), point("a", 0, 10.0), missing_field].concat();
    let store = CheckpointStore::open(&db).unwrap();
    let responses = drive_with(Mode::MovingAverage, &first, Some(store), options).await;
    assert!(matches!(responses.last(), Some(Response::Error(_))));

    // Nothing was checkpointed, so the group starts over.
    let second = [smoothing(), point("a", 2, 10.0)].concat();
    let store = CheckpointStore::open(&db).unwrap();
    let responses = drive_with(Mode::MovingAverage, &second, Some(store), options).await;
    assert_eq!(averages(&responses), vec![5.0]);
    if let Some(dir) = db.parent() {
        std::fs::remove_dir_all(dir).unwrap();
    }
}

#[tokio::test]
async fn out_of_range_time_is_answered_not_fatal() {
    // Parses fine, but one period later is past the last representable
    // instant.
    let far = r#"{"point": {"name": "cpu", "time": "+262142-12-31T23:59:59Z",
        "tags": {"host": "a"}, "fields_double": {"value": 1.0}}}"#
        .replace('\n', " ")
        + "\n";
    let input = [
        batching(0, 10),
        far,
        point("a", 0, 1.0),
        line(&Request::Keepalive(Keepalive { time: 1 })),
    ]
    .concat();
    let responses = drive(Mode::Batch, &input).await;
    match responses.as_slice() {
        [Response::Init(_), Response::Error(err), Response::Keepalive(_)] => {
            assert!(err.error.contains("out of range"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn closed_output_is_fatal() {
    let metrics = Metrics::new(&Registry::new()).unwrap();
    let (writer, reader) = tokio::io::duplex(64);
    drop(reader);
    let input = [smoothing(), point("a", 0, 1.0)].concat();
    let err = run_agent(
        Engine::new(Mode::MovingAverage, metrics),
        input.as_bytes(),
        writer,
        None,
        AgentOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AggError::Emission(_)), "{err:?}");
    assert!(err.is_fatal());
}
