use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::utils::lock;
use crate::SourceKind;

/// Point-in-time copy of the pipeline's armed flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagState {
    pub image: bool,
    pub camera: bool,
    pub detection: bool,
}

impl FlagState {
    pub fn source_armed(&self) -> bool {
        self.image || self.camera
    }

    pub fn active_source(&self) -> Option<SourceKind> {
        if self.camera {
            Some(SourceKind::Camera)
        } else if self.image {
            Some(SourceKind::Image)
        } else {
            None
        }
    }

    fn source(&mut self, kind: SourceKind) -> &mut bool {
        match kind {
            SourceKind::Camera => &mut self.camera,
            SourceKind::Image => &mut self.image,
        }
    }
}

/// Armed flags with their ordering rules enforced under one small lock:
/// at most one source is armed, and detection is armed only with a source.
#[derive(Debug, Default)]
pub struct PipelineFlags {
    state: Mutex<FlagState>,
}

impl PipelineFlags {
    pub fn snapshot(&self) -> FlagState {
        *lock(&self.state)
    }

    /// Arm `kind`. `Ok(false)` if it was already armed.
    pub fn arm_source(&self, kind: SourceKind) -> Result<bool> {
        let mut state = lock(&self.state);
        match state.active_source() {
            Some(active) if active == kind => Ok(false),
            Some(active) => Err(Error::SourceConflict {
                requested: kind,
                active,
            }),
            None => {
                *state.source(kind) = true;
                Ok(true)
            }
        }
    }

    /// Disarm `kind`, forcing detection off first. Returns whether it was armed.
    pub fn disarm_source(&self, kind: SourceKind) -> bool {
        let mut state = lock(&self.state);
        let armed = *state.source(kind);
        if armed {
            state.detection = false;
            *state.source(kind) = false;
        }
        armed
    }

    /// Arm detection. `Ok(false)` if it was already armed.
    pub fn arm_detection(&self) -> Result<bool> {
        let mut state = lock(&self.state);
        if !state.source_armed() {
            return Err(Error::NoActiveSource);
        }
        let changed = !state.detection;
        state.detection = true;
        Ok(changed)
    }

    /// Disarm detection. Returns whether it was armed.
    pub fn disarm_detection(&self) -> bool {
        std::mem::replace(&mut lock(&self.state).detection, false)
    }

    pub fn detection_armed(&self) -> bool {
        lock(&self.state).detection
    }

    pub fn is_armed(&self, kind: SourceKind) -> bool {
        *lock(&self.state).source(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_start_and_stop_are_noops() {
        let flags = PipelineFlags::default();
        assert!(flags.arm_source(SourceKind::Image).unwrap());
        assert!(!flags.arm_source(SourceKind::Image).unwrap());
        assert!(flags.arm_detection().unwrap());
        assert!(!flags.arm_detection().unwrap());

        assert!(flags.disarm_detection());
        assert!(!flags.disarm_detection());
        assert!(flags.disarm_source(SourceKind::Image));
        assert!(!flags.disarm_source(SourceKind::Image));
        assert_eq!(flags.snapshot(), FlagState::default());
    }

    #[test]
    fn detection_requires_a_source() {
        let flags = PipelineFlags::default();
        assert!(matches!(flags.arm_detection(), Err(Error::NoActiveSource)));
        assert!(!flags.detection_armed());
    }

    #[test]
    fn stopping_the_source_forces_detection_off() {
        let flags = PipelineFlags::default();
        flags.arm_source(SourceKind::Camera).unwrap();
        flags.arm_detection().unwrap();
        flags.disarm_source(SourceKind::Camera);
        assert!(!flags.detection_armed());
    }

    #[test]
    fn sources_are_mutually_exclusive() {
        let flags = PipelineFlags::default();
        flags.arm_source(SourceKind::Camera).unwrap();
        assert!(matches!(
            flags.arm_source(SourceKind::Image),
            Err(Error::SourceConflict {
                requested: SourceKind::Image,
                active: SourceKind::Camera
            })
        ));
        // Stopping the idle source leaves the armed one alone.
        assert!(!flags.disarm_source(SourceKind::Image));
        assert!(flags.is_armed(SourceKind::Camera));
    }

    #[test]
    fn flags_follow_the_last_call_of_each_kind() {
        #[derive(Clone, Copy, Debug)]
        enum Op {
            Arm(SourceKind),
            Disarm(SourceKind),
            StartDetect,
            StopDetect,
        }
        let ops = [
            Op::Arm(SourceKind::Image),
            Op::Disarm(SourceKind::Image),
            Op::Arm(SourceKind::Camera),
            Op::Arm(SourceKind::Image),
            Op::StartDetect,
            Op::Disarm(SourceKind::Image),
            Op::StartDetect,
            Op::Disarm(SourceKind::Camera),
            Op::StopDetect,
            Op::StartDetect,
            Op::Arm(SourceKind::Image),
        ];

        // xorshift over the op table, checked against a plain model
        let mut seed = 0x9e37_79b9u32;
        let flags = PipelineFlags::default();
        let mut model = FlagState::default();
        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let op = ops[seed as usize % ops.len()];
            match op {
                Op::Arm(kind) => {
                    let _ = flags.arm_source(kind);
                    if !model.source_armed() {
                        *model.source(kind) = true;
                    }
                }
                Op::Disarm(kind) => {
                    flags.disarm_source(kind);
                    if *model.source(kind) {
                        *model.source(kind) = false;
                        model.detection = false;
                    }
                }
                Op::StartDetect => {
                    let _ = flags.arm_detection();
                    model.detection = model.source_armed();
                }
                Op::StopDetect => {
                    flags.disarm_detection();
                    model.detection = false;
                }
            }
            let state = flags.snapshot();
            assert_eq!(state, model, "after {op:?}");
            assert!(!(state.image && state.camera));
            assert!(!state.detection || state.source_armed());
        }
    }
}
