//! Sample table model and random-access sample lookup.
//!
//! Tables as stored in the file:
//! - stts: run-length sample durations
//! - stsc: run-length chunk layout (samples per chunk)
//! - stsz: sample sizes
//! - stco/co64: chunk offsets
//! - stss: sync samples (keyframes); absent means every sample is a sync sample

#[cfg(feature = "serialize")]
use serde::Serialize;

use super::track::Track;

/// One stts run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct TimeToSample {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// One stsc run, with the 1-based sample range it covers once annotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct SampleToChunk {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
    pub start_sample: u32,
    pub end_sample: u32,
}

impl SampleToChunk {
    pub fn new(first_chunk: u32, samples_per_chunk: u32, sample_description_index: u32) -> Self {
        Self {
            first_chunk,
            samples_per_chunk,
            sample_description_index,
            start_sample: 0,
            end_sample: 0,
        }
    }
}

/// Fill in `start_sample`/`end_sample` for every entry.
///
/// Entry 0 starts at sample 1; each following entry starts where the chunks
/// of the previous run end; the last entry ends at `sample_count`. The result
/// depends only on `first_chunk`, `samples_per_chunk` and `sample_count`, so
/// annotating twice is a no-op.
pub fn annotate_chunk_ranges(entries: &mut [SampleToChunk], sample_count: u32) {
    let mut start = 1u32;
    for i in 0..entries.len() {
        if i > 0 {
            let prev = entries[i - 1];
            let chunks = entries[i].first_chunk.saturating_sub(prev.first_chunk);
            start = prev
                .start_sample
                .saturating_add(chunks.saturating_mul(prev.samples_per_chunk));
            entries[i - 1].end_sample = start.saturating_sub(1);
        }
        entries[i].start_sample = start;
    }
    if let Some(last) = entries.last_mut() {
        last.end_sample = sample_count;
    }
}

/// Resolved location and timing of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// 1-based sample number.
    pub number: u32,
    /// Absolute byte offset.
    pub offset: u64,
    pub size: u32,
    /// Duration in track timescale units.
    pub duration: u32,
    pub is_key_frame: bool,
}

/// Precomputed lookup structure over a track's sample tables.
///
/// Built once per track; each [`SampleIndex::sample`] call is two binary
/// searches plus constant work.
#[derive(Debug, Clone, Default)]
pub struct SampleIndex {
    chunk_runs: Vec<SampleToChunk>,
    chunk_offsets: Vec<u64>,
    /// `size_prefix[i]` is the byte total of samples `1..=i`.
    size_prefix: Vec<u64>,
    /// Cumulative sample count at the end of each stts run.
    duration_ends: Vec<u64>,
    durations: Vec<u32>,
    /// Sorted sync sample numbers; `None` when the track has no stss.
    sync_samples: Option<Vec<u32>>,
}

impl SampleIndex {
    pub fn new(track: &Track) -> Self {
        let mut chunk_runs = track.sample_to_chunks.clone();
        annotate_chunk_ranges(&mut chunk_runs, track.sample_count());

        let mut size_prefix = Vec::with_capacity(track.sample_sizes.len() + 1);
        size_prefix.push(0u64);
        let mut total = 0u64;
        for size in &track.sample_sizes {
            total += *size as u64;
            size_prefix.push(total);
        }

        let mut duration_ends = Vec::with_capacity(track.time_to_samples.len());
        let mut durations = Vec::with_capacity(track.time_to_samples.len());
        let mut cumulative = 0u64;
        for run in &track.time_to_samples {
            cumulative += run.sample_count as u64;
            duration_ends.push(cumulative);
            durations.push(run.sample_delta);
        }

        let sync_samples = track.sync_samples.as_ref().map(|s| {
            let mut s = s.clone();
            s.sort_unstable();
            s
        });

        Self {
            chunk_runs,
            chunk_offsets: track.chunk_offsets.clone(),
            size_prefix,
            duration_ends,
            durations,
            sync_samples,
        }
    }

    /// Number of samples indexed.
    pub fn len(&self) -> u32 {
        (self.size_prefix.len() - 1) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up sample `n` (1-based). `None` for `n == 0`, `n` past the last
    /// sample, or a sample whose chunk is missing from the offset table.
    pub fn sample(&self, n: u32) -> Option<Sample> {
        if n == 0 || n > self.len() {
            return None;
        }

        let run_idx = self
            .chunk_runs
            .partition_point(|r| r.start_sample <= n)
            .checked_sub(1)?;
        let run = &self.chunk_runs[run_idx];
        if n > run.end_sample || run.samples_per_chunk == 0 {
            return None;
        }

        let chunk_in_run = (n - run.start_sample) / run.samples_per_chunk;
        let chunk_number = run.first_chunk.checked_add(chunk_in_run)?;
        let chunk_offset = *self.chunk_offsets.get(chunk_number.checked_sub(1)? as usize)?;
        let chunk_first_sample = run.start_sample + chunk_in_run * run.samples_per_chunk;
        let offset = chunk_offset
            + (self.size_prefix[(n - 1) as usize] - self.size_prefix[(chunk_first_sample - 1) as usize]);
        let size = (self.size_prefix[n as usize] - self.size_prefix[(n - 1) as usize]) as u32;

        Some(Sample {
            number: n,
            offset,
            size,
            duration: self.duration(n),
            is_key_frame: self.is_key_frame(n),
        })
    }

    /// Duration of sample `n`; 0 when the stts runs do not reach it.
    pub fn duration(&self, n: u32) -> u32 {
        let idx = self.duration_ends.partition_point(|end| *end < n as u64);
        self.durations.get(idx).copied().unwrap_or(0)
    }

    pub fn is_key_frame(&self, n: u32) -> bool {
        match &self.sync_samples {
            Some(sync) => sync.binary_search(&n).is_ok(),
            None => true,
        }
    }

    /// Sum of all sample durations.
    pub fn total_duration(&self) -> u64 {
        let mut prev = 0u64;
        let mut total = 0u64;
        for (end, delta) in self.duration_ends.iter().zip(&self.durations) {
            total += (end - prev) * *delta as u64;
            prev = *end;
        }
        total
    }
}
