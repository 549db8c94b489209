// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::master::Master;
use sloth_adapters::CommandInterpreter;
use sloth_core::test_support::hook_def;
use sloth_core::SystemClock;
use sloth_engine::resolver::ResolverConfig;
use sloth_engine::{
    AgentRegistry, ArtifactStaging, EventBus, ExecRouter, LocalDispatcher, RegistryConfig,
    RemoteDispatcher, Resolver, SchedulerConfig, TaskLogger,
};
use sloth_proto::{AgentInfo, TaskEnvelope};
use sloth_storage::RegistryStore;
use sloth_workflow::test_support::{task_after, workflow};

const TOKEN: &str = "listener-token";

async fn start_listener(tmp: &tempfile::TempDir) -> (String, Arc<Master>, CancellationToken) {
    let store = Arc::new(RegistryStore::open_in_memory().unwrap());
    let bus = EventBus::new(Arc::clone(&store));
    let registry = AgentRegistry::new(
        Arc::clone(&store),
        bus.clone(),
        SystemClock,
        RegistryConfig::default(),
    );
    let resolver = Arc::new(Resolver::new(registry.clone(), ResolverConfig::default()));
    let interpreter = CommandInterpreter::new();
    let dispatcher = Arc::new(ExecRouter::new(
        LocalDispatcher::new(interpreter.clone(), tmp.path().join("work")),
        RemoteDispatcher::new(TOKEN),
    ));
    let master = Arc::new(Master::new(
        store,
        bus,
        registry,
        resolver,
        dispatcher,
        interpreter,
        ArtifactStaging::new(tmp.path().join("artifacts")),
        TaskLogger::new(tmp.path().join("logs")),
        SchedulerConfig::default(),
    ));

    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap().to_string();
    let cancel = CancellationToken::new();
    let listener = Arc::new(Listener::new(Arc::clone(&master), TOKEN));
    tokio::spawn(listener.run(socket, cancel.clone()));
    (address, master, cancel)
}

async fn connect(address: &str, token: &str, version: u32) -> (TcpStream, HelloReply) {
    let mut stream = TcpStream::connect(address).await.unwrap();
    write_msg(
        &mut stream,
        &Hello {
            version,
            auth_digest: auth_digest(token),
        },
        DEFAULT_IO_TIMEOUT,
    )
    .await
    .unwrap();
    let reply: HelloReply = read_msg(&mut stream, DEFAULT_IO_TIMEOUT).await.unwrap();
    (stream, reply)
}

async fn roundtrip(stream: &mut TcpStream, request: &Request) -> Response {
    write_msg(stream, request, DEFAULT_IO_TIMEOUT).await.unwrap();
    read_msg(stream, Duration::from_secs(60)).await.unwrap()
}

fn agent_info(name: &str) -> AgentInfo {
    AgentInfo {
        name: name.into(),
        address: "10.0.0.1:50051".into(),
        version: "0.1.0".into(),
        tags: Default::default(),
        system: Default::default(),
    }
}

#[tokio::test]
async fn denies_bad_credentials() {
    let tmp = tempfile::tempdir().unwrap();
    let (address, _master, _cancel) = start_listener(&tmp).await;

    let (_stream, reply) = connect(&address, "wrong", PROTOCOL_VERSION).await;
    assert!(matches!(reply, HelloReply::Denied { .. }));
}

#[tokio::test]
async fn agent_session_register_heartbeat_list() {
    let tmp = tempfile::tempdir().unwrap();
    let (address, _master, _cancel) = start_listener(&tmp).await;

    // One connection carries registration then heartbeats, like a real
    // agent session.
    let (mut agent_conn, reply) = connect(&address, TOKEN, PROTOCOL_VERSION).await;
    assert!(matches!(reply, HelloReply::Ok { .. }));

    let response = roundtrip(
        &mut agent_conn,
        &Request::Register {
            info: agent_info("a1"),
        },
    )
    .await;
    assert!(matches!(response, Response::RegisterOk { .. }));

    let response = roundtrip(
        &mut agent_conn,
        &Request::Heartbeat { name: "a1".into() },
    )
    .await;
    assert_eq!(response, Response::HeartbeatOk);

    // A client sees the agent as Active.
    let (mut client, _) = connect(&address, TOKEN, PROTOCOL_VERSION).await;
    let response = roundtrip(
        &mut client,
        &Request::ListAgents {
            status: Some("active".into()),
            tag: None,
        },
    )
    .await;
    let Response::Agents { agents } = response else {
        panic!("expected agents");
    };
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].name, "a1");
}

#[tokio::test]
async fn version_mismatched_register_is_refused_and_logged() {
    let tmp = tempfile::tempdir().unwrap();
    let (address, master, _cancel) = start_listener(&tmp).await;

    let (mut stream, _) = connect(&address, TOKEN, PROTOCOL_VERSION + 1).await;
    let response = roundtrip(
        &mut stream,
        &Request::Register {
            info: agent_info("old-agent"),
        },
    )
    .await;
    assert!(matches!(response, Response::Err { .. }));

    let mismatches = master
        .store
        .list_events(Some("agent.version_mismatch"), 10)
        .unwrap();
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].data["name"], "old-agent");
}

#[tokio::test]
async fn submit_returns_submitted_then_report() {
    let tmp = tempfile::tempdir().unwrap();
    let (address, _master, _cancel) = start_listener(&tmp).await;

    let (mut client, _) = connect(&address, TOKEN, PROTOCOL_VERSION).await;
    write_msg(
        &mut client,
        &Request::Submit {
            spec: workflow("hello", vec![task_after("t", "echo hi", &[])]),
            validate_only: false,
        },
        DEFAULT_IO_TIMEOUT,
    )
    .await
    .unwrap();

    let submitted: Response = read_msg(&mut client, DEFAULT_IO_TIMEOUT).await.unwrap();
    let Response::Submitted { workflow_id } = submitted else {
        panic!("expected Submitted first, got {submitted:?}");
    };

    let report: Response = read_msg(&mut client, Duration::from_secs(60)).await.unwrap();
    let Response::Report { report } = report else {
        panic!("expected Report");
    };
    assert!(report.success);
    assert_eq!(report.workflow_id, workflow_id);
}

#[tokio::test]
async fn validate_only_submission_does_not_run() {
    let tmp = tempfile::tempdir().unwrap();
    let (address, master, _cancel) = start_listener(&tmp).await;

    let (mut client, _) = connect(&address, TOKEN, PROTOCOL_VERSION).await;
    let response = roundtrip(
        &mut client,
        &Request::Submit {
            spec: workflow("check", vec![task_after("t", "echo hi", &[])]),
            validate_only: true,
        },
    )
    .await;
    assert_eq!(
        response,
        Response::Validated {
            name: "check".into(),
            tasks: 1
        }
    );
    assert!(master.store.list_events(None, 10).unwrap().is_empty());
}

#[tokio::test]
async fn hook_admin_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let (address, _master, _cancel) = start_listener(&tmp).await;
    let (mut client, _) = connect(&address, TOKEN, PROTOCOL_VERSION).await;

    let def = hook_def("notify", "task.*");
    assert_eq!(
        roundtrip(&mut client, &Request::PutHook { def: def.clone() }).await,
        Response::Ok
    );

    let Response::Hooks { hooks } = roundtrip(&mut client, &Request::ListHooks).await else {
        panic!("expected hooks");
    };
    assert_eq!(hooks, vec![def]);

    assert_eq!(
        roundtrip(
            &mut client,
            &Request::SetHookEnabled {
                name: "notify".into(),
                enabled: false,
            },
        )
        .await,
        Response::Ok
    );

    assert_eq!(
        roundtrip(
            &mut client,
            &Request::DeleteHook {
                name: "notify".into()
            }
        )
        .await,
        Response::Removed { existed: true }
    );
}

#[tokio::test]
async fn events_are_queryable_over_the_wire() {
    let tmp = tempfile::tempdir().unwrap();
    let (address, _master, _cancel) = start_listener(&tmp).await;
    let (mut client, _) = connect(&address, TOKEN, PROTOCOL_VERSION).await;

    // Run something so the log has content.
    write_msg(
        &mut client,
        &Request::Submit {
            spec: workflow("hello", vec![task_after("t", "echo hi", &[])]),
            validate_only: false,
        },
        DEFAULT_IO_TIMEOUT,
    )
    .await
    .unwrap();
    let _: Response = read_msg(&mut client, DEFAULT_IO_TIMEOUT).await.unwrap();
    let _: Response = read_msg(&mut client, Duration::from_secs(60)).await.unwrap();

    let response = roundtrip(
        &mut client,
        &Request::ListEvents {
            selector: Some("workflow.*".into()),
            limit: 10,
        },
    )
    .await;
    let Response::Events { events } = response else {
        panic!("expected events");
    };
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].tag, "workflow.completed");
    assert_eq!(events[1].tag, "workflow.started");
}

#[tokio::test]
async fn unused_envelope_type_is_not_accepted_here() {
    // The listener speaks Request, not MasterToAgent: an Execute envelope
    // aimed at the master is a protocol error and closes the connection.
    let tmp = tempfile::tempdir().unwrap();
    let (address, _master, _cancel) = start_listener(&tmp).await;
    let (mut client, _) = connect(&address, TOKEN, PROTOCOL_VERSION).await;

    let envelope = TaskEnvelope {
        task_id: sloth_core::TaskId::new("t"),
        workflow_id: sloth_core::WorkflowId::new("wf"),
        task_name: "t".into(),
        script: sloth_core::TaskScript::Command("true".into()),
        params: Default::default(),
        deps: Default::default(),
        env: Default::default(),
        workdir: None,
        timeout_ms: 1000,
        artifacts: vec![],
        inputs: Default::default(),
        user: None,
    };
    write_msg(
        &mut client,
        &sloth_proto::MasterToAgent::Execute { envelope },
        DEFAULT_IO_TIMEOUT,
    )
    .await
    .unwrap();

    // The daemon drops the connection; the read sees EOF.
    let result: Result<Response, _> = read_msg(&mut client, Duration::from_secs(5)).await;
    assert!(result.is_err());
}
