//! Hand-off protocol tests: exclusivity, ordering, stop priority,
//! disconnect release and crash recovery, driven through the pure arbiter
//! state machine with real protocol lines.

use bridge_core::arbiter::{Action, Arbiter, ConnId};
use bridge_core::filter::{CommandFilter, EngineLimits};
use bridge_core::session::{SessionId, SessionStore};
use bridge_protocol::{parse_client_line, parse_engine_line};

const A: ConnId = ConnId(1);
const B: ConnId = ConnId(2);
const C: ConnId = ConnId(3);

fn arbiter() -> Arbiter {
    let limits = EngineLimits {
        max_threads: 8,
        max_hash: 64,
        variants: Vec::new(),
    };
    Arbiter::new(CommandFilter::new(limits), SessionStore::new(16))
}

fn say(arbiter: &mut Arbiter, conn: ConnId, line: &str) -> Vec<Action> {
    let cmd = parse_client_line(line)
        .expect("well-framed line")
        .expect("non-blank line");
    arbiter.client_command(conn, cmd, line)
}

fn engine_says(arbiter: &mut Arbiter, line: &str) -> Vec<Action> {
    arbiter.engine_event(parse_engine_line(line), line)
}

fn engine_writes(actions: &[Action]) -> Vec<String> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::EngineWrite(line) => Some(line.clone()),
            _ => None,
        })
        .collect()
}

fn sends_to(actions: &[Action], conn: ConnId) -> Vec<String> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::ClientSend(to, line) if *to == conn => Some(line.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn first_command_runs_reset_before_grant() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));

    // Engine is idle: the hand-off still passes through the reset.
    let actions = say(&mut arb, A, "isready");
    assert_eq!(engine_writes(&actions), vec!["ucinewgame", "isready"]);
    assert_eq!(arb.owner(), None, "not granted before the reset completes");

    // readyok acknowledges the reset; the queued command goes out and the
    // token is granted.
    let actions = engine_says(&mut arb, "readyok");
    assert_eq!(engine_writes(&actions), vec!["isready"]);
    assert_eq!(arb.owner(), Some(A));

    // The reset's own readyok was not relayed to the client.
    assert!(sends_to(&actions, A).is_empty());

    // The client's isready answer is relayed.
    let actions = engine_says(&mut arb, "readyok");
    assert_eq!(sends_to(&actions, A), vec!["readyok"]);
}

#[test]
fn owner_commands_forward_in_order() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    say(&mut arb, A, "isready");
    engine_says(&mut arb, "readyok");
    engine_says(&mut arb, "readyok");
    assert_eq!(arb.owner(), Some(A));

    let actions = say(&mut arb, A, "position startpos moves e2e4");
    assert_eq!(engine_writes(&actions), vec!["position startpos moves e2e4"]);
    let actions = say(&mut arb, A, "go infinite");
    assert_eq!(engine_writes(&actions), vec!["go infinite"]);
    assert!(arb.is_searching());
}

/// The scenario from the design discussion: A sets Threads=4 and starts a
/// search; B preempts with Threads=2; A later reconnects under its old
/// session identifier and must see Threads=4 replayed.
#[test]
fn preemption_replays_remembered_options() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    arb.connect(B, SessionId("b".into()));

    // A acquires the engine by setting an option. The setoption is not
    // queued: the reapply stage delivers it.
    let actions = say(&mut arb, A, "setoption name Threads value 4");
    assert_eq!(engine_writes(&actions), vec!["ucinewgame", "isready"]);
    let actions = engine_says(&mut arb, "readyok");
    assert_eq!(
        engine_writes(&actions),
        vec!["setoption name Threads value 4"]
    );
    assert_eq!(arb.owner(), Some(A));

    say(&mut arb, A, "go infinite");
    assert!(arb.is_searching());

    // B speaks while A is searching: stop on behalf of A, nothing else.
    let actions = say(&mut arb, B, "setoption name Threads value 2");
    assert_eq!(engine_writes(&actions), vec!["stop"]);
    assert_eq!(arb.owner(), None);

    // The final bestmove still belongs to A (drain), then the reset runs.
    let actions = engine_says(&mut arb, "bestmove e2e4");
    assert_eq!(sends_to(&actions, A), vec!["bestmove e2e4"]);
    assert!(sends_to(&actions, B).is_empty());
    assert_eq!(engine_writes(&actions), vec!["ucinewgame", "isready"]);

    // Reset acknowledged: exactly B's remembered options, then the grant.
    let actions = engine_says(&mut arb, "readyok");
    assert_eq!(
        engine_writes(&actions),
        vec!["setoption name Threads value 2"]
    );
    assert_eq!(arb.owner(), Some(B));

    // A reconnects under its original session identifier.
    arb.disconnect(A);
    arb.connect(C, SessionId("a".into()));
    say(&mut arb, B, "go infinite");
    let actions = say(&mut arb, C, "isready");
    assert_eq!(engine_writes(&actions), vec!["stop"]);
    let actions = engine_says(&mut arb, "bestmove d2d4");
    assert_eq!(engine_writes(&actions), vec!["ucinewgame", "isready"]);
    let actions = engine_says(&mut arb, "readyok");
    assert_eq!(
        engine_writes(&actions),
        vec!["setoption name Threads value 4", "isready"],
        "Threads=4 restored before anything the reconnected client sent"
    );
    assert_eq!(arb.owner(), Some(C));
}

#[test]
fn stop_bypasses_a_pending_handoff() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    arb.connect(B, SessionId("b".into()));
    say(&mut arb, A, "isready");
    engine_says(&mut arb, "readyok");
    engine_says(&mut arb, "readyok");
    say(&mut arb, A, "go infinite");

    // B requests ownership; the hand-off now waits for quiescence.
    say(&mut arb, B, "position startpos");
    assert_eq!(arb.owner(), None);

    // A stop from anyone goes straight through, ahead of queued work.
    let actions = say(&mut arb, B, "stop");
    assert_eq!(engine_writes(&actions), vec!["stop"]);
    let actions = say(&mut arb, A, "stop");
    assert_eq!(engine_writes(&actions), vec!["stop"]);
}

#[test]
fn non_owner_commands_never_reach_the_engine_early() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    arb.connect(B, SessionId("b".into()));
    say(&mut arb, A, "isready");
    engine_says(&mut arb, "readyok");
    engine_says(&mut arb, "readyok");
    say(&mut arb, A, "go infinite");

    // B's command is queued, not forwarded: the only write is the stop.
    let actions = say(&mut arb, B, "position startpos");
    assert_eq!(engine_writes(&actions), vec!["stop"]);

    // More traffic from B while the hand-off is pending: still nothing.
    let actions = say(&mut arb, B, "go depth 3");
    assert!(engine_writes(&actions).is_empty());

    // Only after quiescence + reset do B's commands flow, in order.
    engine_says(&mut arb, "bestmove e2e4");
    let actions = engine_says(&mut arb, "readyok");
    assert_eq!(
        engine_writes(&actions),
        vec!["position startpos", "go depth 3"]
    );
    assert_eq!(arb.owner(), Some(B));
}

#[test]
fn competing_claimant_latest_wins() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    arb.connect(B, SessionId("b".into()));
    arb.connect(C, SessionId("c".into()));
    say(&mut arb, A, "isready");
    engine_says(&mut arb, "readyok");
    engine_says(&mut arb, "readyok");
    say(&mut arb, A, "go infinite");

    say(&mut arb, B, "position startpos");
    // C supersedes B while the same stop/drain sequence keeps running.
    let actions = say(&mut arb, C, "position startpos moves e2e4");
    assert!(engine_writes(&actions).is_empty());

    engine_says(&mut arb, "bestmove e2e4");
    let actions = engine_says(&mut arb, "readyok");
    assert_eq!(
        engine_writes(&actions),
        vec!["position startpos moves e2e4"],
        "the superseded claimant's queue is dropped"
    );
    assert_eq!(arb.owner(), Some(C));
}

#[test]
fn owner_disconnect_is_implicit_stop_and_release() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    say(&mut arb, A, "isready");
    engine_says(&mut arb, "readyok");
    engine_says(&mut arb, "readyok");
    say(&mut arb, A, "go infinite");

    let actions = arb.disconnect(A);
    assert_eq!(engine_writes(&actions), vec!["stop"]);
    assert_eq!(arb.owner(), None);

    // Output arriving while ownerless is dropped.
    let actions = engine_says(&mut arb, "bestmove e2e4");
    assert!(actions.is_empty());
}

#[test]
fn claimant_disconnect_mid_handoff_releases_after_completion() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    arb.connect(B, SessionId("b".into()));
    say(&mut arb, A, "isready");
    engine_says(&mut arb, "readyok");
    engine_says(&mut arb, "readyok");
    say(&mut arb, A, "go infinite");
    say(&mut arb, B, "position startpos");

    // The claimant vanishes; the sequence still runs to completion.
    arb.disconnect(B);
    engine_says(&mut arb, "bestmove e2e4");
    let actions = engine_says(&mut arb, "readyok");
    assert!(engine_writes(&actions).is_empty());
    assert_eq!(arb.owner(), None, "token released, engine left ownerless");
}

#[test]
fn crash_drops_handoff_and_dirties_sessions() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    say(&mut arb, A, "setoption name Hash value 32");
    let actions = engine_says(&mut arb, "readyok");
    assert_eq!(engine_writes(&actions), vec!["setoption name Hash value 32"]);
    assert!(arb
        .session_store()
        .get(&SessionId("a".into()))
        .expect("session exists")
        .is_clean());

    let actions = arb.engine_crashed();
    assert_eq!(
        sends_to(&actions, A),
        vec!["info string engine restarted, session context lost"]
    );
    assert_eq!(arb.owner(), None);
    assert!(!arb
        .session_store()
        .get(&SessionId("a".into()))
        .expect("session survives the crash")
        .is_clean());

    // Next ownership reapplies the full remembered option state.
    let actions = say(&mut arb, A, "isready");
    assert_eq!(engine_writes(&actions), vec!["ucinewgame", "isready"]);
    let actions = engine_says(&mut arb, "readyok");
    assert_eq!(
        engine_writes(&actions),
        vec!["setoption name Hash value 32", "isready"]
    );
    assert_eq!(arb.owner(), Some(A));
}

#[test]
fn filtered_commands_produce_no_engine_bytes() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));

    for line in ["rm -rf /", "quit", "eval", "setoption name Threads value lots"] {
        let actions = say(&mut arb, A, line);
        assert!(
            engine_writes(&actions).is_empty(),
            "{line:?} must not reach the engine"
        );
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, Action::Reject(conn, _) if *conn == A)),
            "{line:?} must be rejected"
        );
    }

    // The legacy no-op is accepted silently, with no engine interaction.
    let actions = say(&mut arb, A, "register later");
    assert!(actions.is_empty());
    assert_eq!(arb.owner(), None, "a rejected or local command acquires nothing");
}

#[test]
fn out_of_range_option_is_clamped_and_remembered_clamped() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));

    say(&mut arb, A, "setoption name Threads value 64");
    let actions = engine_says(&mut arb, "readyok");
    assert_eq!(
        engine_writes(&actions),
        vec!["setoption name Threads value 8"],
        "the clamped value is what gets remembered and replayed"
    );
}

#[test]
fn ceiling_breach_stops_the_search() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    say(&mut arb, A, "isready");
    engine_says(&mut arb, "readyok");
    engine_says(&mut arb, "readyok");
    say(&mut arb, A, "go infinite");

    let actions = arb.ceiling_exceeded();
    assert_eq!(engine_writes(&actions), vec!["stop"]);
    assert_eq!(
        sends_to(&actions, A),
        vec!["info string search stopped: resource limit reached"]
    );

    // Idle engine: a ceiling signal is a no-op.
    engine_says(&mut arb, "bestmove e2e4");
    assert!(arb.ceiling_exceeded().is_empty());
}

/// Reset + reapply runs on every hand-off, even when the same session
/// regains the engine; the replayed lines are identical each time, so
/// idempotent option application on the engine side keeps behavior
/// unchanged.
#[test]
fn regaining_ownership_replays_the_same_options_again() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    say(&mut arb, A, "setoption name Threads value 4");
    let first = engine_writes(&engine_says(&mut arb, "readyok"));
    assert_eq!(arb.owner(), Some(A));

    arb.disconnect(A);
    arb.connect(B, SessionId("a".into()));
    say(&mut arb, B, "isready");
    let second = engine_writes(&engine_says(&mut arb, "readyok"));

    assert_eq!(first, vec!["setoption name Threads value 4"]);
    assert_eq!(
        second,
        vec!["setoption name Threads value 4", "isready"],
        "identical option set replayed on the second hand-off"
    );
}

#[test]
fn second_go_while_searching_is_rejected() {
    let mut arb = arbiter();
    arb.connect(A, SessionId("a".into()));
    say(&mut arb, A, "isready");
    engine_says(&mut arb, "readyok");
    engine_says(&mut arb, "readyok");
    say(&mut arb, A, "go infinite");

    let actions = say(&mut arb, A, "go depth 3");
    assert!(engine_writes(&actions).is_empty());
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::Reject(conn, _) if *conn == A)));
}
