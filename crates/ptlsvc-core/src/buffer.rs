//! Receive buffer descriptors.
//!
//! A `BufferDesc` owns one fixed-size receive buffer for its whole life.
//! Where the bytes physically are depends on the state:
//!
//! ```text
//!            arm()              deliver()              rearm()
//!  Unarmed ─────────▶ Armed ───────────────▶ Delivering ─────────▶ Armed
//!  (desc holds buf)   (transport holds buf)  (event/request holds buf)
//!     │                 │                        │
//!     └──── retire() ───┴──────── retire() ──────┴──▶ Retired (freed)
//! ```
//!
//! `rearm()` is the only way out of `Delivering` back to `Armed`, and it
//! needs the buffer handed back by value, so a delivery can be re-armed at
//! most once. Every illegal transition is a [`Fault`].

use crate::error::{Fault, Result, SvcError};
use crate::event::{ArmHandle, BufferId};

/// Externally visible state of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Allocated, never registered.
    Unarmed,
    /// Registered with the transport, eligible to receive.
    Armed,
    /// A completion references it; its contents belong to the claimant.
    Delivering,
    /// Unregistered and freed.
    Retired,
}

enum Slot {
    Unarmed(Box<[u8]>),
    Armed(ArmHandle),
    Delivering,
    Retired,
}

pub struct BufferDesc {
    id: BufferId,
    size: usize,
    slot: Slot,
}

impl BufferDesc {
    /// Allocate a zeroed buffer of `size` bytes.
    pub fn allocate(id: BufferId, size: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| SvcError::ResourceExhausted("request buffer"))?;
        buf.resize(size, 0);
        Ok(Self {
            id,
            size,
            slot: Slot::Unarmed(buf.into_boxed_slice()),
        })
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn state(&self) -> BufferState {
        match self.slot {
            Slot::Unarmed(_) => BufferState::Unarmed,
            Slot::Armed(_) => BufferState::Armed,
            Slot::Delivering => BufferState::Delivering,
            Slot::Retired => BufferState::Retired,
        }
    }

    /// The registration handle, while armed.
    pub fn arm_handle(&self) -> Option<ArmHandle> {
        match self.slot {
            Slot::Armed(h) => Some(h),
            _ => None,
        }
    }

    fn illegal(&self, op: &'static str) -> Fault {
        Fault::BufferState {
            id: self.id,
            state: self.state(),
            op,
        }
    }

    /// Unarmed → Armed. `register` hands the buffer to the transport.
    ///
    /// If registration fails the buffer is gone with it and the descriptor
    /// is retired.
    pub fn arm<F>(&mut self, register: F) -> Result<()>
    where
        F: FnOnce(Box<[u8]>) -> Result<ArmHandle>,
    {
        let buf = match std::mem::replace(&mut self.slot, Slot::Retired) {
            Slot::Unarmed(buf) => buf,
            other => {
                self.slot = other;
                return Err(self.illegal("arm").into());
            }
        };
        self.slot = Slot::Armed(register(buf)?);
        Ok(())
    }

    /// Armed → Delivering. Called when a completion for this descriptor is
    /// claimed.
    pub fn deliver(&mut self) -> std::result::Result<(), Fault> {
        match self.slot {
            Slot::Armed(_) => {
                self.slot = Slot::Delivering;
                Ok(())
            }
            _ => Err(self.illegal("deliver")),
        }
    }

    /// Delivering → Armed, giving the delivered buffer back to the transport.
    pub fn rearm<F>(&mut self, buf: Box<[u8]>, register: F) -> std::result::Result<(), Fault>
    where
        F: FnOnce(Box<[u8]>) -> Result<ArmHandle>,
    {
        if !matches!(self.slot, Slot::Delivering) {
            return Err(self.illegal("rearm"));
        }
        match register(buf) {
            Ok(h) => {
                self.slot = Slot::Armed(h);
                Ok(())
            }
            Err(e) => {
                self.slot = Slot::Retired;
                Err(Fault::Rearm {
                    id: self.id,
                    code: e.errno(),
                })
            }
        }
    }

    /// Delivering → Retired, freeing a delivered buffer that will not be
    /// re-armed.
    pub fn retire_delivered(&mut self, buf: Box<[u8]>) -> std::result::Result<(), Fault> {
        if !matches!(self.slot, Slot::Delivering) {
            return Err(self.illegal("retire"));
        }
        drop(buf);
        self.slot = Slot::Retired;
        Ok(())
    }

    /// Any state → Retired.
    ///
    /// An armed buffer is first unregistered through `unregister`, which
    /// returns the buffer so it can be freed here. Returns whether an
    /// unregistration took place. The descriptor is retired even when
    /// unregistration fails; the error is returned for the caller to log.
    pub fn retire<F>(&mut self, unregister: F) -> Result<bool>
    where
        F: FnOnce(ArmHandle) -> Result<Box<[u8]>>,
    {
        match std::mem::replace(&mut self.slot, Slot::Retired) {
            Slot::Armed(h) => unregister(h).map(drop).map(|_| true),
            Slot::Unarmed(buf) => {
                drop(buf);
                Ok(false)
            }
            Slot::Delivering | Slot::Retired => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_register(buf: Box<[u8]>) -> Result<ArmHandle> {
        Ok(ArmHandle(buf.len() as u64))
    }

    #[test]
    fn test_allocate() {
        let d = BufferDesc::allocate(BufferId(1), 4096).unwrap();
        assert_eq!(d.state(), BufferState::Unarmed);
        assert_eq!(d.size(), 4096);
        assert_eq!(d.arm_handle(), None);
    }

    #[test]
    fn test_full_cycle() {
        let mut d = BufferDesc::allocate(BufferId(0), 64).unwrap();
        d.arm(ok_register).unwrap();
        assert_eq!(d.state(), BufferState::Armed);
        assert_eq!(d.arm_handle(), Some(ArmHandle(64)));

        d.deliver().unwrap();
        assert_eq!(d.state(), BufferState::Delivering);

        d.rearm(vec![0u8; 64].into_boxed_slice(), ok_register).unwrap();
        assert_eq!(d.state(), BufferState::Armed);

        let unarmed = d.retire(|_| Ok(vec![0u8; 64].into_boxed_slice())).unwrap();
        assert!(unarmed);
        assert_eq!(d.state(), BufferState::Retired);
    }

    #[test]
    fn test_rearm_requires_delivery() {
        let mut d = BufferDesc::allocate(BufferId(2), 64).unwrap();
        d.arm(ok_register).unwrap();
        let err = d
            .rearm(vec![0u8; 64].into_boxed_slice(), ok_register)
            .unwrap_err();
        assert_eq!(
            err,
            Fault::BufferState {
                id: BufferId(2),
                state: BufferState::Armed,
                op: "rearm",
            }
        );
        assert_eq!(d.state(), BufferState::Armed);
    }

    #[test]
    fn test_double_delivery_rejected() {
        let mut d = BufferDesc::allocate(BufferId(0), 64).unwrap();
        d.arm(ok_register).unwrap();
        d.deliver().unwrap();
        assert!(d.deliver().is_err());
    }

    #[test]
    fn test_arm_twice_rejected() {
        let mut d = BufferDesc::allocate(BufferId(0), 64).unwrap();
        d.arm(ok_register).unwrap();
        assert!(d.arm(ok_register).is_err());
        assert_eq!(d.state(), BufferState::Armed);
    }

    #[test]
    fn test_arm_failure_retires() {
        let mut d = BufferDesc::allocate(BufferId(0), 64).unwrap();
        let err = d
            .arm(|_| Err(SvcError::Transport { op: "arm", code: 5 }))
            .unwrap_err();
        assert!(matches!(err, SvcError::Transport { op: "arm", .. }));
        assert_eq!(d.state(), BufferState::Retired);
    }

    #[test]
    fn test_rearm_failure_is_fault() {
        let mut d = BufferDesc::allocate(BufferId(4), 64).unwrap();
        d.arm(ok_register).unwrap();
        d.deliver().unwrap();
        let err = d
            .rearm(vec![0u8; 64].into_boxed_slice(), |_| {
                Err(SvcError::Transport { op: "arm", code: libc::ENOSPC })
            })
            .unwrap_err();
        assert_eq!(err, Fault::Rearm { id: BufferId(4), code: -libc::ENOSPC });
        assert_eq!(d.state(), BufferState::Retired);
    }

    #[test]
    fn test_retire_skips_never_armed() {
        let mut d = BufferDesc::allocate(BufferId(0), 64).unwrap();
        let unarmed = d.retire(|_| panic!("never armed")).unwrap();
        assert!(!unarmed);
        assert_eq!(d.state(), BufferState::Retired);
        // Idempotent.
        assert!(!d.retire(|_| panic!("already retired")).unwrap());
    }

    #[test]
    fn test_retire_delivered() {
        let mut d = BufferDesc::allocate(BufferId(0), 64).unwrap();
        d.arm(ok_register).unwrap();
        assert!(d.retire_delivered(vec![0u8; 64].into_boxed_slice()).is_err());
        d.deliver().unwrap();
        d.retire_delivered(vec![0u8; 64].into_boxed_slice()).unwrap();
        assert_eq!(d.state(), BufferState::Retired);
    }
}
