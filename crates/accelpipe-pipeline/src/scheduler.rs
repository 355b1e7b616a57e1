use accelpipe_core::{
    DispatchError, FrameSource, FrameTiming, ProcessingSlot, Result, RunResult, SlotState,
    Validation,
};

use crate::timestamps::TimestampLog;

/// Extra iterations after the last frame that only drain in-flight work.
///
/// Every slot is revisited exactly once more after its last issue.
pub const fn epilogue_iterations(pool_size: usize) -> u64 {
    pool_size as u64
}

/// Loop length for `num_frames` frames over `pool_size` slots.
///
/// `None` when the count does not fit in a `u64`.
pub const fn total_iterations(num_frames: u64, pool_size: usize) -> Option<u64> {
    num_frames.checked_add(epilogue_iterations(pool_size))
}

/// Round-robin slot choice for a frame.
pub fn slot_for_frame(frame_index: u64, pool_size: usize) -> usize {
    (frame_index % pool_size as u64) as usize
}

/// Whether `frame_index` is the first frame its slot ever receives.
///
/// Only these jobs have a precomputed reference to compare against.
pub fn is_first_pass(frame_index: u64, pool_size: usize) -> bool {
    frame_index < pool_size as u64
}

/// Byte-exact comparison of a slot output against the reference output.
///
/// A reference shorter than the output cannot match.
pub fn check_frame(output: &[u8], reference: &[u8]) -> bool {
    reference.get(..output.len()) == Some(output)
}

/// Round-robin, software-pipelined dispatch of frames over a slot pool.
///
/// Frame `i` goes to slot `i mod P`. A slot is only waited on when it comes
/// round again, so with P slots each device has P-1 iterations of host
/// work to finish its previous job. The loop runs P extra iterations at the
/// end so every issued job is waited on exactly once.
pub struct FrameScheduler {
    num_frames: u64,
    retain_timings: bool,
}

impl FrameScheduler {
    pub fn new(num_frames: u64) -> Self {
        Self {
            num_frames,
            retain_timings: true,
        }
    }

    /// Keep every `FrameTiming` on the run result. Totals are kept either way.
    pub fn retain_timings(mut self, enabled: bool) -> Self {
        self.retain_timings = enabled;
        self
    }

    pub fn num_frames(&self) -> u64 {
        self.num_frames
    }

    /// Drive `num_frames` frames from `source` through `slots`.
    ///
    /// A reference mismatch marks the result failed and the run continues.
    /// Any error from a slot or the source aborts the loop immediately and
    /// is returned; slots may still be busy in that case.
    pub fn run<S: ProcessingSlot>(
        &mut self,
        slots: &mut [S],
        source: &mut dyn FrameSource,
        mut timestamps: Option<&mut TimestampLog>,
    ) -> Result<RunResult> {
        let pool_size = slots.len();
        if pool_size == 0 {
            return Err(DispatchError::Config(
                "cannot schedule frames over an empty slot pool".into(),
            ));
        }

        let total = total_iterations(self.num_frames, pool_size).ok_or_else(|| {
            DispatchError::Config(format!(
                "{} frames over {pool_size} slots overflows the iteration count",
                self.num_frames
            ))
        })?;
        let mut states = vec![SlotState::Idle; pool_size];
        let mut result = RunResult::new(pool_size);

        tracing::info!(
            frames = self.num_frames,
            slots = pool_size,
            iterations = total,
            "starting frame dispatch"
        );

        for frame_index in 0..total {
            let index = slot_for_frame(frame_index, pool_size);
            let slot = &mut slots[index];
            result.stats.iterations += 1;

            if let SlotState::Issued { frame_index: issued } = states[index] {
                let report = slot.wait().inspect_err(|e| {
                    tracing::error!(slot = slot.label(), frame = issued, error = %e, "wait failed");
                })?;
                result.stats.waits += 1;

                match report {
                    Some(report) => {
                        debug_assert_eq!(report.frame_index, issued);
                        result.frames_completed += 1;
                        result.host_ms_total += f64::from(report.host_ms);

                        let timing = FrameTiming {
                            frame_index: issued,
                            slot_index: index,
                            slot: slot.label().to_string(),
                            host_ms: report.host_ms,
                            stages: report.stages,
                        };
                        tracing::debug!(
                            frame = issued,
                            slot = slot.label(),
                            host_ms = timing.host_ms,
                            "frame complete"
                        );
                        if let Some(log) = timestamps.as_deref_mut() {
                            log.record(&timing)?;
                        }
                        if self.retain_timings {
                            result.timings.push(timing);
                        }

                        if is_first_pass(issued, pool_size) {
                            let matched = match slot.output() {
                                Some(out) => {
                                    out.with(|bytes| check_frame(bytes, source.reference_output()))?
                                }
                                None => false,
                            };
                            if !matched {
                                tracing::warn!(
                                    slot = slot.label(),
                                    index,
                                    frame = issued,
                                    "output does not match reference"
                                );
                                result.passed = false;
                            }
                            result.validations.push(Validation {
                                slot_index: index,
                                frame_index: issued,
                                matched,
                            });
                        }
                    }
                    None => {
                        tracing::warn!(
                            slot = slot.label(),
                            frame = issued,
                            "slot had no outstanding job to wait on"
                        );
                    }
                }
                states[index] = SlotState::Idle;
            }

            if frame_index >= self.num_frames {
                result.stats.drain_iterations += 1;
                continue;
            }

            // The input buffer may still be read by a live job until the slot is idle.
            if !states[index].is_idle() || slot.is_busy() {
                return Err(DispatchError::SlotBusy {
                    slot: slot.label().to_string(),
                });
            }
            let input = slot.input().cloned().ok_or_else(|| DispatchError::Unbound {
                slot: slot.label().to_string(),
            })?;
            if !source.read_next(frame_index, &input)? {
                result.stats.frames_skipped += 1;
                tracing::debug!(frame = frame_index, "frame source exhausted");
                continue;
            }

            slot.issue_async(frame_index).inspect_err(|e| {
                tracing::error!(slot = slot.label(), frame = frame_index, error = %e, "issue failed");
            })?;
            states[index] = SlotState::Issued { frame_index };
            result.frames_issued += 1;
            result.stats.issues += 1;
        }

        debug_assert!(states.iter().all(SlotState::is_idle));

        tracing::info!(
            passed = result.passed,
            issued = result.frames_issued,
            completed = result.frames_completed,
            validations = result.validations.len(),
            "frame dispatch finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use accelpipe_core::{BufferRef, HostBuffer, JobReport};
    use accelpipe_source::MemoryFrameSource;
    use parking_lot::Mutex;

    const FRAME: usize = 8;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Issue { slot: usize, frame: u64 },
        Wait { slot: usize, frame: u64 },
    }

    type EventLog = Arc<Mutex<Vec<Event>>>;

    /// Slot that "computes" `out = in ^ 0x5a` synchronously on wait and
    /// records every call.
    struct ScriptedSlot {
        index: usize,
        label: String,
        input: Option<BufferRef>,
        output: Option<BufferRef>,
        outstanding: Option<u64>,
        corrupt: bool,
        fail_on_frame: Option<u64>,
        /// Reports busy even with nothing issued, like a device that never
        /// acknowledged its last job.
        stuck_busy: bool,
        events: EventLog,
    }

    impl ProcessingSlot for ScriptedSlot {
        fn label(&self) -> &str {
            &self.label
        }
        fn input_size(&self) -> usize {
            FRAME
        }
        fn output_size(&self) -> usize {
            FRAME
        }
        fn bind_buffers(&mut self, input: BufferRef, output: BufferRef) -> Result<()> {
            self.input = Some(input);
            self.output = Some(output);
            Ok(())
        }
        fn unbind_buffers(&mut self) {
            self.input = None;
            self.output = None;
        }
        fn input(&self) -> Option<&BufferRef> {
            self.input.as_ref()
        }
        fn output(&self) -> Option<&BufferRef> {
            self.output.as_ref()
        }
        fn is_busy(&self) -> bool {
            self.stuck_busy || self.outstanding.is_some()
        }
        fn issue_async(&mut self, frame_index: u64) -> Result<()> {
            if self.outstanding.is_some() {
                return Err(DispatchError::SlotBusy {
                    slot: self.label.clone(),
                });
            }
            self.events.lock().push(Event::Issue {
                slot: self.index,
                frame: frame_index,
            });
            self.outstanding = Some(frame_index);
            Ok(())
        }
        fn wait(&mut self) -> Result<Option<JobReport>> {
            let Some(frame) = self.outstanding.take() else {
                return Ok(None);
            };
            self.events.lock().push(Event::Wait {
                slot: self.index,
                frame,
            });
            if self.fail_on_frame == Some(frame) {
                return Err(DispatchError::runtime(self.label.clone(), "device hang"));
            }
            let mut bytes = self.input.as_ref().unwrap().to_vec()?;
            for b in &mut bytes {
                *b ^= 0x5a;
            }
            if self.corrupt {
                bytes[0] = !bytes[0];
            }
            self.output
                .as_ref()
                .unwrap()
                .with_mut(|out| out.copy_from_slice(&bytes))?;
            Ok(Some(JobReport {
                frame_index: frame,
                host_ms: 2.0,
                stages: Vec::new(),
            }))
        }
    }

    struct Harness {
        slots: Vec<ScriptedSlot>,
        _buffers: Vec<HostBuffer>,
        events: EventLog,
    }

    fn harness(pool_size: usize) -> Harness {
        let events: EventLog = Arc::default();
        let mut buffers = Vec::new();
        let slots = (0..pool_size)
            .map(|index| {
                let input = HostBuffer::alloc(FRAME).unwrap();
                let output = HostBuffer::alloc(FRAME).unwrap();
                let mut slot = ScriptedSlot {
                    index,
                    label: format!("mock{index}"),
                    input: None,
                    output: None,
                    outstanding: None,
                    corrupt: false,
                    fail_on_frame: None,
                    stuck_busy: false,
                    events: events.clone(),
                };
                slot.bind_buffers(input.downgrade(), output.downgrade()).unwrap();
                buffers.push(input);
                buffers.push(output);
                slot
            })
            .collect();
        Harness {
            slots,
            _buffers: buffers,
            events,
        }
    }

    /// Every frame is the same bytes, so every first pass has a reference.
    fn constant_source(num_frames: usize) -> MemoryFrameSource {
        let frame: Vec<u8> = (0..FRAME as u8).collect();
        let reference: Vec<u8> = frame.iter().map(|b| b ^ 0x5a).collect();
        MemoryFrameSource::new(vec![frame; num_frames], reference)
    }

    #[test]
    fn iteration_count_and_drain_for_all_sizes() {
        for pool_size in 1..=5 {
            for num_frames in 0..=12u64 {
                let mut h = harness(pool_size);
                let mut source = constant_source(num_frames as usize);
                let result = FrameScheduler::new(num_frames)
                    .run(&mut h.slots, &mut source, None)
                    .unwrap();

                assert_eq!(
                    result.stats.iterations,
                    num_frames + pool_size as u64,
                    "P={pool_size} F={num_frames}"
                );
                assert_eq!(result.stats.drain_iterations, pool_size as u64);
                assert!(h.slots.iter().all(|s| !s.is_busy()));
                assert_eq!(result.frames_issued, num_frames);
                assert_eq!(result.frames_completed, num_frames);
                assert_eq!(
                    result.validations.len() as u64,
                    num_frames.min(pool_size as u64)
                );
                assert!(result.passed);
            }
        }
    }

    #[test]
    fn round_robin_and_strict_issue_wait_alternation() {
        let pool_size = 3;
        let mut h = harness(pool_size);
        let mut source = constant_source(10);
        FrameScheduler::new(10)
            .run(&mut h.slots, &mut source, None)
            .unwrap();

        let events = h.events.lock().clone();
        for slot in 0..pool_size {
            let mine: Vec<Event> = events
                .iter()
                .copied()
                .filter(|e| match e {
                    Event::Issue { slot: s, .. } | Event::Wait { slot: s, .. } => *s == slot,
                })
                .collect();
            // issue, wait, issue, wait, ... and every frame lands on i mod P.
            for (k, pair) in mine.chunks(2).enumerate() {
                let frame = (slot + k * pool_size) as u64;
                assert_eq!(pair[0], Event::Issue { slot, frame });
                assert_eq!(pair[1], Event::Wait { slot, frame });
            }
        }
    }

    #[test]
    fn wait_is_deferred_until_slot_comes_round() {
        let mut h = harness(4);
        let mut source = constant_source(8);
        FrameScheduler::new(8)
            .run(&mut h.slots, &mut source, None)
            .unwrap();

        let events = h.events.lock().clone();
        // The first four events are issues: nothing waits before the pool fills.
        assert!(events[..4]
            .iter()
            .all(|e| matches!(e, Event::Issue { .. })));
        assert_eq!(events[4], Event::Wait { slot: 0, frame: 0 });
        assert_eq!(events[5], Event::Issue { slot: 0, frame: 4 });
    }

    #[test]
    fn scenario_single_slot_three_frames() {
        let mut h = harness(1);
        let mut source = constant_source(3);
        let result = FrameScheduler::new(3)
            .run(&mut h.slots, &mut source, None)
            .unwrap();

        assert_eq!(result.stats.iterations, 4);
        assert_eq!(result.stats.issues, 3);
        assert_eq!(result.stats.drain_iterations, 1);
        assert_eq!(
            result.validations,
            vec![Validation {
                slot_index: 0,
                frame_index: 0,
                matched: true
            }]
        );
        let events = h.events.lock().clone();
        assert_eq!(
            events,
            vec![
                Event::Issue { slot: 0, frame: 0 },
                Event::Wait { slot: 0, frame: 0 },
                Event::Issue { slot: 0, frame: 1 },
                Event::Wait { slot: 0, frame: 1 },
                Event::Issue { slot: 0, frame: 2 },
                Event::Wait { slot: 0, frame: 2 },
            ]
        );
    }

    #[test]
    fn scenario_four_slots_thirty_frames() {
        let mut h = harness(4);
        let mut source = constant_source(30);
        let result = FrameScheduler::new(30)
            .run(&mut h.slots, &mut source, None)
            .unwrap();

        assert_eq!(result.stats.iterations, 34);
        assert_eq!(result.validations.len(), 4);
        let mut validated: Vec<usize> = result.validations.iter().map(|v| v.slot_index).collect();
        validated.sort_unstable();
        assert_eq!(validated, vec![0, 1, 2, 3]);
        assert!(result
            .validations
            .iter()
            .all(|v| v.frame_index == v.slot_index as u64));
    }

    #[test]
    fn mismatch_on_one_slot_does_not_abort() {
        let mut h = harness(4);
        h.slots[2].corrupt = true;
        let mut source = constant_source(30);
        let result = FrameScheduler::new(30)
            .run(&mut h.slots, &mut source, None)
            .unwrap();

        assert!(result.failed());
        assert_eq!(result.frames_completed, 30);
        assert_eq!(result.mismatched_slots(), vec![2]);
        assert_eq!(result.validations.iter().filter(|v| v.matched).count(), 3);
    }

    #[test]
    fn runtime_fault_aborts_without_retry() {
        let mut h = harness(2);
        h.slots[1].fail_on_frame = Some(3);
        let mut source = constant_source(10);
        let err = FrameScheduler::new(10)
            .run(&mut h.slots, &mut source, None)
            .unwrap_err();
        assert!(err.is_runtime_fault());

        let events = h.events.lock().clone();
        // Frame 3 is waited on at iteration 5; nothing is issued after that.
        assert_eq!(*events.last().unwrap(), Event::Wait { slot: 1, frame: 3 });
        let waits_on_3 = events
            .iter()
            .filter(|e| **e == Event::Wait { slot: 1, frame: 3 })
            .count();
        assert_eq!(waits_on_3, 1);
    }

    #[test]
    fn short_source_keeps_draining() {
        let mut h = harness(3);
        let mut source = constant_source(4);
        let result = FrameScheduler::new(10)
            .run(&mut h.slots, &mut source, None)
            .unwrap();

        assert_eq!(result.frames_issued, 4);
        assert_eq!(result.frames_completed, 4);
        assert_eq!(result.stats.frames_skipped, 6);
        assert_eq!(result.stats.iterations, 13);
        assert!(h.slots.iter().all(|s| !s.is_busy()));
    }

    #[test]
    fn empty_pool_is_rejected_before_reading() {
        let mut slots: Vec<ScriptedSlot> = Vec::new();
        let mut source = constant_source(3);
        assert!(FrameScheduler::new(3)
            .run(&mut slots, &mut source, None)
            .is_err());
        assert!(source.served().is_empty());
    }

    #[test]
    fn busy_slot_input_is_not_overwritten() {
        let mut h = harness(2);
        h.slots[1].stuck_busy = true;
        let mut source = constant_source(4);
        let err = FrameScheduler::new(4)
            .run(&mut h.slots, &mut source, None)
            .unwrap_err();

        assert!(matches!(err, DispatchError::SlotBusy { .. }));
        // Frame 0 went to slot 0; frame 1 was never read into slot 1.
        assert_eq!(source.served(), &[0]);
        assert_eq!(h.slots[1].input().unwrap().to_vec().unwrap(), vec![0; FRAME]);
    }

    #[test]
    fn overflowing_frame_count_is_rejected_before_reading() {
        let mut h = harness(2);
        let mut source = constant_source(1);
        let err = FrameScheduler::new(u64::MAX)
            .run(&mut h.slots, &mut source, None)
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(source.served().is_empty());
    }

    #[test]
    fn timings_can_be_dropped_while_totals_are_kept() {
        let mut h = harness(3);
        let mut source = constant_source(9);
        let result = FrameScheduler::new(9)
            .retain_timings(false)
            .run(&mut h.slots, &mut source, None)
            .unwrap();

        assert!(result.timings.is_empty());
        assert_eq!(result.frames_completed, 9);
        assert_eq!(result.validations.len(), 3);
        assert_eq!(result.mean_host_ms(), 2.0);
    }

    #[test]
    fn boxed_slots_schedule_like_concrete_ones() {
        let h = harness(2);
        let mut boxed: Vec<Box<dyn ProcessingSlot>> = h
            .slots
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn ProcessingSlot>)
            .collect();
        let mut source = constant_source(5);
        let result = FrameScheduler::new(5)
            .run(&mut boxed, &mut source, None)
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.frames_completed, 5);
    }

    #[test]
    fn frame_check() {
        assert!(check_frame(&[1, 2], &[1, 2, 3]));
        assert!(!check_frame(&[1, 2], &[1]));
        assert!(!check_frame(&[1, 2], &[1, 3]));
        assert!(check_frame(&[], &[]));
    }

    #[test]
    fn named_bounds() {
        assert_eq!(epilogue_iterations(4), 4);
        assert_eq!(total_iterations(30, 4), Some(34));
        assert_eq!(total_iterations(u64::MAX, 1), None);
        assert_eq!(slot_for_frame(9, 4), 1);
        assert!(is_first_pass(3, 4));
        assert!(!is_first_pass(4, 4));
    }
}
