//! [`Verbs`] over the system libibverbs.

use std::ffi::CStr;
use std::io;
use std::ptr::{self, NonNull};
use std::{mem, slice};

use crate::bindings::*;
use crate::rdma::buf::RegionBuf;
use crate::rdma::cq::{Wc, WcStatus, POLL_BATCH};
use crate::rdma::gid::Gid;
use crate::rdma::mr::{MrInfo, MrRemote, Permission};
use crate::rdma::qp::{QpCaps, Transition};
use crate::rdma::type_alias::*;
use crate::rdma::verbs::{PortAttr, PortState, Verbs};
use crate::utils::interop::*;

/// Wrapper for `*mut ibv_context`.
#[derive(Debug)]
#[repr(transparent)]
pub struct IbContext(NonNull<ibv_context>);
impl_ibv_wrapper_traits!(ibv_context, IbContext);

/// Wrapper for `*mut ibv_pd`.
#[derive(Debug)]
#[repr(transparent)]
pub struct IbPd(NonNull<ibv_pd>);
impl_ibv_wrapper_traits!(ibv_pd, IbPd);

/// Wrapper for `*mut ibv_cq`.
#[derive(Debug)]
#[repr(transparent)]
pub struct IbCq(NonNull<ibv_cq>);
impl_ibv_wrapper_traits!(ibv_cq, IbCq);

/// Wrapper for `*mut ibv_qp`.
#[derive(Debug)]
#[repr(transparent)]
pub struct IbQp(NonNull<ibv_qp>);
impl_ibv_wrapper_traits!(ibv_qp, IbQp);

/// Wrapper for `*mut ibv_mr`.
#[derive(Debug)]
#[repr(transparent)]
pub struct IbMr(NonNull<ibv_mr>);
impl_ibv_wrapper_traits!(ibv_mr, IbMr);

/// Device list that frees itself.
struct DeviceList {
    list: NonNull<*mut ibv_device>,
    len: usize,
}

impl DeviceList {
    fn get() -> io::Result<Self> {
        let mut num = 0;
        // SAFETY: FFI.
        let list = unsafe { ibv_get_device_list(&mut num) };
        let list = NonNull::new(list).ok_or_else(io::Error::last_os_error)?;
        Ok(Self {
            list,
            len: num.max(0) as usize,
        })
    }

    fn iter(&self) -> impl Iterator<Item = (String, *mut ibv_device)> + '_ {
        // SAFETY: the list holds `len` valid device pointers until freed.
        let devices = unsafe { slice::from_raw_parts(self.list.as_ptr(), self.len) };
        devices.iter().map(|&dev| {
            // SAFETY: FFI; the name is a NUL-terminated string owned by the device.
            let name = unsafe { CStr::from_ptr(ibv_get_device_name(dev)) };
            (name.to_string_lossy().into_owned(), dev)
        })
    }
}

impl Drop for DeviceList {
    fn drop(&mut self) {
        // SAFETY: FFI; the list is freed exactly once.
        unsafe { ibv_free_device_list(self.list.as_ptr()) };
    }
}

/// The system RDMA provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct IbVerbs;

impl Verbs for IbVerbs {
    type Context = IbContext;
    type Pd = IbPd;
    type Cq = IbCq;
    type Qp = IbQp;
    type Mr = IbMr;

    fn devices(&self) -> io::Result<Vec<String>> {
        Ok(DeviceList::get()?.iter().map(|(name, _)| name).collect())
    }

    fn open_device(&self, name: &str) -> io::Result<IbContext> {
        let list = DeviceList::get()?;
        let (_, dev) = list
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENODEV))?;
        // SAFETY: FFI; the device list is still alive.
        IbContext::from_raw(unsafe { ibv_open_device(dev) })
    }

    fn close_device(&self, ctx: IbContext) -> io::Result<()> {
        // SAFETY: FFI; the handle is consumed.
        from_c_ret(unsafe { ibv_close_device(ctx.as_ptr()) })
    }

    fn query_port(&self, ctx: &IbContext, port_num: PortNum) -> io::Result<PortAttr> {
        // SAFETY: POD type.
        let mut attr = unsafe { mem::zeroed::<_compat_ibv_port_attr>() };
        // SAFETY: FFI.
        from_c_ret(unsafe { ibv_query_port(ctx.as_ptr(), port_num, &mut attr) })?;
        Ok(PortAttr {
            state: PortState::from(attr.state),
            lid: attr.lid,
        })
    }

    fn query_gid(&self, ctx: &IbContext, port_num: PortNum, index: GidIndex) -> io::Result<Gid> {
        // SAFETY: POD type.
        let mut gid = unsafe { mem::zeroed::<ibv_gid>() };
        // SAFETY: FFI.
        from_c_ret(unsafe { ibv_query_gid(ctx.as_ptr(), port_num, index as _, &mut gid) })?;
        // SAFETY: every bit pattern is a valid `raw`.
        Ok(Gid::from(unsafe { gid.raw }))
    }

    fn alloc_pd(&self, ctx: &IbContext) -> io::Result<IbPd> {
        // SAFETY: FFI.
        IbPd::from_raw(unsafe { ibv_alloc_pd(ctx.as_ptr()) })
    }

    fn dealloc_pd(&self, pd: IbPd) -> io::Result<()> {
        // SAFETY: FFI; the handle is consumed.
        from_c_ret(unsafe { ibv_dealloc_pd(pd.as_ptr()) })
    }

    fn create_cq(&self, ctx: &IbContext, depth: u32) -> io::Result<IbCq> {
        // SAFETY: FFI.
        let cq = unsafe {
            ibv_create_cq(
                ctx.as_ptr(),
                depth as _,
                ptr::null_mut(),
                ptr::null_mut(),
                0,
            )
        };
        IbCq::from_raw(cq)
    }

    fn destroy_cq(&self, cq: IbCq) -> io::Result<()> {
        // SAFETY: FFI; the handle is consumed.
        from_c_ret(unsafe { ibv_destroy_cq(cq.as_ptr()) })
    }

    fn create_qp(&self, pd: &IbPd, send_cq: &IbCq, recv_cq: &IbCq, caps: &QpCaps) -> io::Result<IbQp> {
        // SAFETY: POD type.
        let mut init_attr = unsafe { mem::zeroed::<ibv_qp_init_attr>() };
        init_attr.send_cq = send_cq.as_ptr();
        init_attr.recv_cq = recv_cq.as_ptr();
        init_attr.cap = ibv_qp_cap {
            max_send_wr: caps.max_send_wr,
            max_recv_wr: caps.max_recv_wr,
            max_send_sge: caps.max_send_sge,
            max_recv_sge: caps.max_recv_sge,
            max_inline_data: caps.max_inline_data,
        };
        init_attr.qp_type = ibv_qp_type::IBV_QPT_RC;
        init_attr.sq_sig_all = 0;

        // SAFETY: FFI.
        IbQp::from_raw(unsafe { ibv_create_qp(pd.as_ptr(), &mut init_attr) })
    }

    fn destroy_qp(&self, qp: IbQp) -> io::Result<()> {
        // SAFETY: FFI; the handle is consumed.
        from_c_ret(unsafe { ibv_destroy_qp(qp.as_ptr()) })
    }

    fn qp_num(&self, qp: &IbQp) -> Qpn {
        // SAFETY: `qp` points to a valid `ibv_qp` instance.
        unsafe { (*qp.as_ptr()).qp_num }
    }

    fn modify_qp(&self, qp: &IbQp, transition: &Transition) -> io::Result<()> {
        // SAFETY: POD type.
        let mut attr = unsafe { mem::zeroed::<ibv_qp_attr>() };
        let mut attr_mask = ibv_qp_attr_mask::IBV_QP_STATE;

        match transition {
            Transition::Init(init) => {
                attr.qp_state = ibv_qp_state::IBV_QPS_INIT;
                attr.pkey_index = init.pkey_index;
                attr.port_num = init.port_num;
                attr.qp_access_flags = init.access.bits();
                attr_mask |= ibv_qp_attr_mask::IBV_QP_PKEY_INDEX
                    | ibv_qp_attr_mask::IBV_QP_PORT
                    | ibv_qp_attr_mask::IBV_QP_ACCESS_FLAGS;
            }
            Transition::Rtr(rtr) => {
                attr.qp_state = ibv_qp_state::IBV_QPS_RTR;
                attr.path_mtu = rtr.path_mtu as u32;
                attr.dest_qp_num = rtr.dest_qpn;
                attr.rq_psn = rtr.rq_psn;
                attr.max_dest_rd_atomic = rtr.max_dest_rd_atomic;
                attr.min_rnr_timer = rtr.min_rnr_timer;
                attr.ah_attr.dlid = rtr.dlid;
                attr.ah_attr.sl = rtr.sl;
                attr.ah_attr.src_path_bits = rtr.src_path_bits;
                attr.ah_attr.port_num = rtr.port_num;
                if let Some(grh) = rtr.grh {
                    attr.ah_attr.is_global = 1;
                    attr.ah_attr.grh.dgid.raw = grh.dgid.into();
                    attr.ah_attr.grh.sgid_index = grh.sgid_index;
                    attr.ah_attr.grh.hop_limit = grh.hop_limit;
                    attr.ah_attr.grh.flow_label = grh.flow_label;
                    attr.ah_attr.grh.traffic_class = grh.traffic_class;
                }
                attr_mask |= ibv_qp_attr_mask::IBV_QP_AV
                    | ibv_qp_attr_mask::IBV_QP_PATH_MTU
                    | ibv_qp_attr_mask::IBV_QP_DEST_QPN
                    | ibv_qp_attr_mask::IBV_QP_RQ_PSN
                    | ibv_qp_attr_mask::IBV_QP_MAX_DEST_RD_ATOMIC
                    | ibv_qp_attr_mask::IBV_QP_MIN_RNR_TIMER;
            }
            Transition::Rts(rts) => {
                attr.qp_state = ibv_qp_state::IBV_QPS_RTS;
                attr.timeout = rts.timeout;
                attr.retry_cnt = rts.retry_cnt;
                attr.rnr_retry = rts.rnr_retry;
                attr.sq_psn = rts.sq_psn;
                attr.max_rd_atomic = rts.max_rd_atomic;
                attr_mask |= ibv_qp_attr_mask::IBV_QP_TIMEOUT
                    | ibv_qp_attr_mask::IBV_QP_RETRY_CNT
                    | ibv_qp_attr_mask::IBV_QP_RNR_RETRY
                    | ibv_qp_attr_mask::IBV_QP_SQ_PSN
                    | ibv_qp_attr_mask::IBV_QP_MAX_QP_RD_ATOMIC;
            }
        }

        // SAFETY: FFI.
        let ret = unsafe { ibv_modify_qp(qp.as_ptr(), &mut attr, attr_mask.0 as i32) };
        from_c_ret(ret)
    }

    fn reg_mr(&self, pd: &IbPd, buf: &RegionBuf, perm: Permission) -> io::Result<IbMr> {
        // SAFETY: FFI; `buf` owns `len` bytes at `as_ptr()` with a stable
        // address, and the region is deregistered before the connection
        // releases its handle.
        let mr = unsafe { ibv_reg_mr(pd.as_ptr(), buf.as_ptr().cast(), buf.len(), perm.into()) };
        IbMr::from_raw(mr)
    }

    fn dereg_mr(&self, mr: IbMr) -> io::Result<()> {
        // SAFETY: FFI; the handle is consumed.
        from_c_ret(unsafe { ibv_dereg_mr(mr.as_ptr()) })
    }

    fn mr_info(&self, mr: &IbMr) -> MrInfo {
        // SAFETY: `mr` points to a valid `ibv_mr` instance.
        let mr = unsafe { &*mr.as_ptr() };
        MrInfo {
            addr: mr.addr as u64,
            len: mr.length,
            lkey: mr.lkey,
            rkey: mr.rkey,
        }
    }

    fn post_write(
        &self,
        qp: &IbQp,
        local: &IbMr,
        len: usize,
        remote: MrRemote,
        wr_id: WrId,
        signaled: bool,
    ) -> io::Result<()> {
        let info = self.mr_info(local);
        if len > info.len {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let mut sge = ibv_sge {
            addr: info.addr,
            length: len as u32,
            lkey: info.lkey,
        };

        // SAFETY: POD type.
        let mut wr = unsafe { mem::zeroed::<ibv_send_wr>() };
        wr.wr_id = wr_id;
        wr.sg_list = &mut sge;
        wr.num_sge = 1;
        wr.opcode = ibv_wr_opcode::IBV_WR_RDMA_WRITE;
        if signaled {
            wr.send_flags = ibv_send_flags::IBV_SEND_SIGNALED.0;
        }
        wr.wr.rdma.remote_addr = remote.addr;
        wr.wr.rdma.rkey = remote.rkey;

        let mut bad_wr = ptr::null_mut();
        // SAFETY: FFI; `sge` outlives the call and the provider copies the WR.
        from_c_ret(unsafe { ibv_post_send(qp.as_ptr(), &mut wr, &mut bad_wr) })
    }

    fn poll_cq(&self, cq: &IbCq, wc: &mut [Wc]) -> io::Result<usize> {
        // SAFETY: POD type.
        let mut raw = unsafe { mem::zeroed::<[ibv_wc; POLL_BATCH]>() };
        let num = wc.len().min(POLL_BATCH);
        // SAFETY: FFI; `raw` holds at least `num` entries.
        let ret = unsafe { ibv_poll_cq(cq.as_ptr(), num as i32, raw.as_mut_ptr()) };
        if ret < 0 {
            return Err(io::Error::from_raw_os_error(ret.wrapping_abs()));
        }
        let polled = ret as usize;
        for (dst, src) in wc.iter_mut().zip(&raw[..polled]) {
            *dst = Wc::new(src.wr_id, WcStatus::from(src.status), src.byte_len);
        }
        Ok(polled)
    }
}
