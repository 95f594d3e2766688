use std::fmt;

use thiserror::Error;

use crate::rdma::type_alias::WrId;

/// Status of a completion queue entry.
///
/// Discriminants are those of `enum ibv_wc_status`. The documentation and
/// error messages are borrowed from [RDMAmojo](https://www.rdmamojo.com/2013/02/15/ibv_poll_cq/).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u32)]
pub enum WcStatus {
    /// **Operation completed successfully:** the corresponding Work Request
    /// (and all of the unsignaled Work Requests that were posted previous to
    /// it) ended and the memory buffers it refers to are ready to be reused.
    #[error("success")]
    Success = 0,

    /// **Local Length Error:** the message is greater than the maximum message
    /// size supported by the port.
    #[error("local length error")]
    LocLenErr = 1,

    /// **Local QP Operation Error:** an internal QP consistency error was
    /// detected while processing this Work Request.
    #[error("local QP operation error")]
    LocQpOpErr = 2,

    /// **Local Protection Error:** the locally posted Work Request's buffers
    /// do not reference a Memory Region that is valid for the operation.
    #[error("local protection error")]
    LocProtErr = 4,

    /// **Work Request Flushed Error:** a Work Request was in process or
    /// outstanding when the QP transitioned into the Error State.
    #[error("WR flush error")]
    WrFlushErr = 5,

    /// **Bad Response Error:** an unexpected transport layer opcode was
    /// returned by the responder.
    #[error("bad response error")]
    BadRespErr = 7,

    /// **Remote Invalid Request Error:** the responder detected an invalid
    /// message on the channel, e.g. the remote QP does not allow the operation.
    #[error("remote invalid request error")]
    RemInvReqErr = 9,

    /// **Remote Access Error:** a protection error occurred on the remote
    /// buffer written by an RDMA Write.
    #[error("remote access error")]
    RemAccessErr = 10,

    /// **Remote Operation Error:** the operation could not be completed
    /// successfully by the responder.
    #[error("remote operation error")]
    RemOpErr = 11,

    /// **Transport Retry Counter Exceeded:** the remote side didn't send any
    /// Ack or Nack.
    /// - On the first message, the connection attributes are usually wrong.
    /// - Afterwards, the remote QP usually isn't available anymore.
    #[error("transport retry counter exceeded")]
    RetryExcErr = 12,

    /// **RNR Retry Counter Exceeded:** the RNR NAK retry count was exceeded.
    #[error("RNR retry counter exceeded")]
    RnrRetryExcErr = 13,

    /// **Fatal error:** a fatal error that may not be recoverable.
    #[error("fatal error")]
    FatalErr = 19,

    /// **Response Timeout Error:** a response timed out.
    #[error("response timeout error")]
    RespTimeoutErr = 20,

    /// **General Error:** other error which isn't one of the above errors.
    #[error("general error")]
    GeneralErr = 21,
}

impl From<u32> for WcStatus {
    fn from(wc_status: u32) -> Self {
        match wc_status {
            0 => WcStatus::Success,
            1 => WcStatus::LocLenErr,
            2 => WcStatus::LocQpOpErr,
            4 => WcStatus::LocProtErr,
            5 => WcStatus::WrFlushErr,
            7 => WcStatus::BadRespErr,
            9 => WcStatus::RemInvReqErr,
            10 => WcStatus::RemAccessErr,
            11 => WcStatus::RemOpErr,
            12 => WcStatus::RetryExcErr,
            13 => WcStatus::RnrRetryExcErr,
            19 => WcStatus::FatalErr,
            20 => WcStatus::RespTimeoutErr,
            _ => WcStatus::GeneralErr,
        }
    }
}

/// Work completion entry, as polled from a completion queue.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Wc {
    pub wr_id: WrId,
    pub status: WcStatus,
    pub byte_len: u32,
}

impl Wc {
    pub fn new(wr_id: WrId, status: WcStatus, byte_len: u32) -> Self {
        Self {
            wr_id,
            status,
            byte_len,
        }
    }

    /// Get the completion status as a `Result`.
    ///
    /// - If the status is success, return the number of bytes transferred.
    /// - Otherwise, return the status as an error.
    #[inline]
    pub fn ok(&self) -> Result<usize, WcStatus> {
        match self.status {
            WcStatus::Success => Ok(self.byte_len as usize),
            status => Err(status),
        }
    }
}

impl Default for Wc {
    fn default() -> Self {
        Self::new(0, WcStatus::Success, 0)
    }
}

impl fmt::Debug for Wc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wc")
            .field("wr_id", &self.wr_id)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(WcStatus::from(0), WcStatus::Success);
        assert_eq!(WcStatus::from(12), WcStatus::RetryExcErr);
        assert_eq!(WcStatus::from(3), WcStatus::GeneralErr);
        assert_eq!(WcStatus::from(999), WcStatus::GeneralErr);
        assert_eq!(WcStatus::RemAccessErr as u32, 10);
    }

    #[test]
    fn ok_reports_length_or_status() {
        assert_eq!(Wc::new(1, WcStatus::Success, 64).ok(), Ok(64));
        assert_eq!(
            Wc::new(2, WcStatus::WrFlushErr, 0).ok(),
            Err(WcStatus::WrFlushErr)
        );
    }
}
