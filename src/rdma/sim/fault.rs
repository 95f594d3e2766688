use std::io;

/// Verbs operations of a simulated host at which a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Devices,
    OpenDevice,
    QueryPort,
    QueryGid,
    AllocPd,
    CreateCq,
    CreateQp,
    ModifyQp,
    RegMr,
    PostWrite,
    PollCq,
    DestroyQp,
    DeregMr,
    DestroyCq,
    DeallocPd,
    CloseDevice,
}

/// Armed one-shot failures of one host.
#[derive(Debug, Default)]
pub(super) struct Faults {
    armed: Vec<(SimOp, usize)>,
}

impl Faults {
    /// Fail the call to `op` that follows `skip` successful ones.
    pub fn arm(&mut self, op: SimOp, skip: usize) {
        self.armed.push((op, skip));
    }

    /// Consume one call to `op`, failing with `EIO` if a fault fires.
    pub fn check(&mut self, op: SimOp) -> io::Result<()> {
        let Some(pos) = self.armed.iter().position(|(o, _)| *o == op) else {
            return Ok(());
        };
        let skip = &mut self.armed[pos].1;
        if *skip == 0 {
            self.armed.remove(pos);
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        *skip -= 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_fires_once_after_skips() {
        let mut faults = Faults::default();
        faults.arm(SimOp::RegMr, 1);
        assert!(faults.check(SimOp::CreateQp).is_ok());
        assert!(faults.check(SimOp::RegMr).is_ok());
        let err = faults.check(SimOp::RegMr).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
        assert!(faults.check(SimOp::RegMr).is_ok());
        assert!(faults.is_empty());
    }
}
