use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tridimensional_duels::game::machine;
use tridimensional_duels::game::step::{self, StepResult};
use tridimensional_duels::game::{validator, Submission};
use tridimensional_duels::{Action, MatchDelta, MatchState, PlayerId, Ruleset};
use uuid::Uuid;

fn opening(ruleset: &Ruleset) -> MatchState {
    let players = [PlayerId::new([1; 16]), PlayerId::new([2; 16])];
    let mut state = MatchState::new(Uuid::from_bytes([7; 16]), players, ruleset);
    machine::begin(&mut state, &ruleset.rules);
    state
}

/// Advance phases until the turn limit ends the match.
fn play_out(ruleset: &Ruleset) -> (MatchState, Vec<MatchDelta>) {
    let start = opening(ruleset);
    let mut state = start.clone();
    let mut deltas = Vec::new();
    let mut client_seq = 0;
    while !state.is_over() {
        client_seq += 1;
        let player = state.player(state.active).id;
        let submission = Submission::new(
            player,
            client_seq,
            Action::AdvancePhase { expected: None },
        );
        match step::submit(&mut state, ruleset, &submission) {
            StepResult::Accepted(accepted) => deltas.push(accepted.delta),
            StepResult::Rejected(_) => break,
        }
    }
    (start, deltas)
}

fn bench_validate(c: &mut Criterion) {
    let ruleset = Ruleset::builtin();
    let state = opening(&ruleset);
    let submission = Submission::new(
        PlayerId::new([1; 16]),
        1,
        Action::AdvancePhase { expected: None },
    );
    c.bench_function("validate advance_phase", |b| {
        b.iter(|| validator::validate(black_box(&state), &ruleset, &submission))
    });
}

fn bench_replay(c: &mut Criterion) {
    let ruleset = Ruleset::builtin();
    let (start, deltas) = play_out(&ruleset);
    c.bench_function("replay full match", |b| {
        b.iter(|| step::replay_match(black_box(&start), &deltas))
    });
}

fn bench_hash(c: &mut Criterion) {
    let ruleset = Ruleset::builtin();
    let state = opening(&ruleset);
    c.bench_function("compute state hash", |b| b.iter(|| black_box(&state).compute_hash()));
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(20)
        .measurement_time(Duration::from_secs(2));
    targets = bench_validate, bench_replay, bench_hash
}
criterion_main!(benches);
