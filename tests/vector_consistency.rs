mod common;

use common::{drift, init_logging, tally_fn, Drift, Faults, Tally};
use gym_vector::{
    AsyncConfig, AsyncVectorEnv, BoxSpace, Discrete, Env, EnvSpec, Registry, Seeds, Space, SyncVectorEnv, VectorEnv,
};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

type DriftVectorEnv = dyn VectorEnv<Obs = [f32; 4], Act = u32, ObsSpace = BoxSpace<f32, 4>, ActSpace = Discrete>;

// Everything a runner returns, with floats compared by bit pattern.
#[derive(Debug, PartialEq)]
struct Record {
    observations: Vec<[u32; 4]>,
    rewards: Vec<u32>,
    terminated: Vec<bool>,
    truncated: Vec<bool>,
}

fn bits(observations: &[[f32; 4]]) -> Vec<[u32; 4]> {
    observations.iter().map(|o| o.map(f32::to_bits)).collect()
}

fn rollout(v: &mut DriftVectorEnv, seeds: Seeds, steps: usize, action_seed: u64) -> Vec<Record> {
    v.seed(seeds).unwrap();
    let first = v.reset().unwrap();
    let mut records = vec![Record {
        observations: bits(&first),
        rewards: Vec::new(),
        terminated: Vec::new(),
        truncated: Vec::new(),
    }];

    let actions = v.action_space();
    let mut rng = StdRng::seed_from_u64(action_seed);
    for _ in 0..steps {
        let s = v.step(actions.sample(&mut rng)).unwrap();
        records.push(Record {
            observations: bits(&s.observations),
            rewards: s.rewards.iter().map(|r| r.to_bits()).collect(),
            terminated: s.terminated,
            truncated: s.truncated,
        });
    }
    v.close();
    records
}

fn sequential(n: usize) -> SyncVectorEnv<Drift> {
    SyncVectorEnv::new("Drift-v0", n, drift()).unwrap()
}

fn parallel(n: usize, shared_memory: bool) -> AsyncVectorEnv<Drift> {
    let config = AsyncConfig::default().with_shared_memory(shared_memory);
    AsyncVectorEnv::new("Drift-v0", n, drift(), config).unwrap()
}

#[test]
fn four_envs_hundred_steps_match_bitwise() {
    init_logging();
    let seeds = Seeds::PerEnv(vec![0, 1, 2, 3]);
    let expected = rollout(&mut sequential(4), seeds.clone(), 100, 7);
    // 100 steps outlast the 25-step time limit, so auto-reset is exercised
    assert!(expected.iter().any(|r| r.truncated.iter().chain(&r.terminated).any(|&d| d)));

    for shared in [true, false] {
        let got = rollout(&mut parallel(4, shared), seeds.clone(), 100, 7);
        assert_eq!(got, expected, "shared memory = {shared}");
    }
}

#[test]
fn resets_match_for_one_to_five_envs() {
    init_logging();
    for n in 1..=5 {
        let mut s = sequential(n);
        let mut p = parallel(n, true);
        s.seed(Seeds::Base(123)).unwrap();
        p.seed(Seeds::Base(123)).unwrap();
        assert_eq!(bits(&p.reset().unwrap()), bits(&s.reset().unwrap()), "n = {n}");
        assert_eq!(p.single_observation_space(), s.single_observation_space());
        assert_eq!(p.single_action_space(), s.single_action_space());
        assert_eq!(VectorEnv::observation_space(&p), VectorEnv::observation_space(&s));
        assert_eq!(VectorEnv::action_space(&p), VectorEnv::action_space(&s));
    }
}

#[test]
fn vector_observations_match_through_the_shared_buffer() {
    init_logging();
    let seeds = Seeds::Split(42);
    let mut s = SyncVectorEnv::new("Tally-v0", 3, tally_fn(None)).unwrap();
    s.seed(seeds.clone()).unwrap();
    let first = s.reset().unwrap();
    let actions = VectorEnv::action_space(&s);
    let mut rng = StdRng::seed_from_u64(8);
    let batches: Vec<Vec<u32>> = (0..40).map(|_| actions.sample(&mut rng)).collect();
    let expected: Vec<_> = batches.iter().map(|a| s.step(a.clone()).unwrap()).collect();
    // counters hit 3 well within 40 steps
    assert!(expected.iter().any(|b| b.terminated.iter().any(|&t| t)));

    for shared in [true, false] {
        let config = AsyncConfig::default().with_shared_memory(shared);
        let mut p: AsyncVectorEnv<Tally> = AsyncVectorEnv::new("Tally-v0", 3, tally_fn(None), config).unwrap();
        assert_eq!(p.uses_shared_memory(), shared);
        p.seed(seeds.clone()).unwrap();
        assert_eq!(p.reset().unwrap(), first, "shared memory = {shared}");
        for (a, want) in batches.iter().zip(&expected) {
            assert_eq!(&p.step(a.clone()).unwrap(), want, "shared memory = {shared}");
        }
        p.close();
    }
}

#[test]
fn single_env_batch_matches_the_bare_env() {
    init_logging();
    let expected = rollout(&mut sequential(1), Seeds::Base(0), 60, 3);
    let got = rollout(&mut parallel(1, true), Seeds::Base(0), 60, 3);
    assert_eq!(got, expected);

    // Up to the first episode end the batch of one is just the env itself.
    let mut env = Drift::new(&EnvSpec::new("Drift-v0"), Faults::default()).unwrap();
    env.seed(Some(0)).unwrap();
    let first = env.reset().unwrap();
    assert_eq!(bits(&[first]), expected[0].observations);
    let actions = Discrete::new(6);
    let mut rng = StdRng::seed_from_u64(3);
    for record in &expected[1..] {
        // the batched space draws one action per slot from the same stream
        let s = env.step(actions.sample(&mut rng)).unwrap();
        assert_eq!(vec![s.reward.to_bits()], record.rewards);
        if s.done() {
            break;
        }
        assert_eq!(bits(&[s.observation]), record.observations);
    }
}

#[test]
fn split_phase_calls_match_blocking_calls() {
    init_logging();
    let mut s = sequential(3);
    let mut p = parallel(3, true);
    s.seed(Seeds::Split(11)).unwrap();
    p.seed_async(Seeds::Split(11)).unwrap();
    p.seed_wait().unwrap();

    let expected = s.reset().unwrap();
    p.reset_async().unwrap();
    assert_eq!(bits(&p.reset_wait().unwrap()), bits(&expected));

    for step in 0..30u32 {
        let actions = vec![step % 6, (step + 1) % 6, (step * 5) % 6];
        let want = s.step(actions.clone()).unwrap();
        p.step_async(actions).unwrap();
        let got = p.step_wait().unwrap();
        assert_eq!(bits(&got.observations), bits(&want.observations));
        assert_eq!(got.dones(), want.dones());
        assert_eq!(got.infos, want.infos);
    }
}

#[test]
fn registry_builds_matching_runners() {
    init_logging();
    let mut registry = Registry::new();
    registry.register(EnvSpec::new("Drift-v0").with_max_episode_steps(10), drift()).unwrap();

    let mut s = registry.make_sync("Drift-v0", 2).unwrap();
    let mut p = registry.make_async("Drift-v0", 2, AsyncConfig::default()).unwrap();
    let expected = rollout(&mut s, Seeds::Base(5), 30, 1);
    assert_eq!(rollout(&mut p, Seeds::Base(5), 30, 1), expected);
    // the shorter limit from the registered spec reached the instances
    for slot in 0..2 {
        let mut since_reset = 0;
        for r in &expected[1..] {
            since_reset += 1;
            assert!(since_reset <= 10, "slot {slot} ran past its time limit");
            if r.terminated[slot] || r.truncated[slot] {
                since_reset = 0;
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn parallel_matches_sequential(n in 1usize..=4, root in any::<u64>(), steps in 1usize..40, shared in any::<bool>()) {
        let expected = rollout(&mut sequential(n), Seeds::Split(root), steps, root ^ 1);
        let got = rollout(&mut parallel(n, shared), Seeds::Split(root), steps, root ^ 1);
        prop_assert_eq!(got, expected);
    }
}
