#![no_main]

use libfuzzer_sys::fuzz_target;
use tau_sampler::{
    process_samples, DiagonalGaussian, Path, PolicyHandle, SampleProcessorConfig, StepSeries,
    TabularRecorder, ZeroBaseline,
};

fn paths_from_bytes(data: &[u8]) -> Vec<Path> {
    data.chunks(9)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            let len = usize::from(chunk[0] % 16) + 1;
            let payload = &chunk[1..];
            let rewards = (0..len)
                .map(|step| {
                    payload
                        .get(step % payload.len().max(1))
                        .map(|byte| f64::from(*byte as i8) / 8.0)
                        .unwrap_or(0.0)
                })
                .collect::<Vec<_>>();
            Path::new(
                StepSeries::zeros(vec![2], len),
                StepSeries::zeros(vec![1], len),
                rewards,
            )
            .with_agent_info("log_std", StepSeries::zeros(vec![1], len))
        })
        .collect()
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let recurrent = data[0] & 1 == 1;
    let config = SampleProcessorConfig {
        center_adv: data[0] & 2 == 2,
        positive_adv: data[0] & 4 == 4,
        ..SampleProcessorConfig::default()
    };
    let paths = paths_from_bytes(&data[1..]);
    let lengths = paths.iter().map(Path::len).collect::<Vec<_>>();
    let total = lengths.iter().sum::<usize>();
    let max_len = lengths.iter().copied().max().unwrap_or(0);

    let policy = PolicyHandle {
        recurrent,
        distribution: DiagonalGaussian,
    };
    let mut recorder = TabularRecorder::new();
    let batch = process_samples(&config, &mut ZeroBaseline, &policy, 0, paths, &mut recorder)
        .expect("well-formed paths always process");

    assert_eq!(batch.step_count(), total);
    if let Some(padded) = batch.as_padded() {
        assert_eq!(padded.valids.shape(), vec![lengths.len(), max_len]);
        let valid_steps = padded.valids.as_slice().iter().sum::<f64>();
        assert_eq!(valid_steps as usize, total);
    }
    if let Some(flat) = batch.as_flat() {
        assert_eq!(flat.advantages.len(), total);
        if config.positive_adv {
            assert!(flat.advantages.iter().all(|value| *value >= 0.0));
        }
    }
});
