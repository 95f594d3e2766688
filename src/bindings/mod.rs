//! Bindings of the libibverbs C interfaces the `ibverbs` backend calls.

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]
#![allow(deref_nullptr)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(unused)]

mod common;

mod private {
    use libc::*;
    include!(concat!(env!("OUT_DIR"), "/verbs_bindings.rs"));
}

pub(crate) use self::common::*;

/// Get list of IB devices currently available.
pub(crate) use self::private::ibv_get_device_list;

/// Free the list of ibv_device structs provided by [`ibv_get_device_list`].
pub(crate) use self::private::ibv_free_device_list;

/// Get the device name.
pub(crate) use self::private::ibv_get_device_name;

/// Open the device and create a context for further use.
pub(crate) use self::private::{ibv_close_device, ibv_context, ibv_device, ibv_open_device};

/// Query port attributes through the exported compat symbol.
pub(crate) use self::private::{_compat_ibv_port_attr, ibv_port_state, ibv_query_port};

/// Query a GID table entry.
pub(crate) use self::private::{ibv_gid, ibv_query_gid};

pub(crate) use self::private::{ibv_alloc_pd, ibv_dealloc_pd, ibv_pd};

pub(crate) use self::private::{ibv_cq, ibv_create_cq, ibv_destroy_cq, ibv_wc, ibv_wc_status};

pub(crate) use self::private::{ibv_access_flags, ibv_dereg_mr, ibv_mr, ibv_reg_mr};

pub(crate) use self::private::{
    ibv_create_qp, ibv_destroy_qp, ibv_modify_qp, ibv_mtu, ibv_qp, ibv_qp_attr, ibv_qp_attr_mask,
    ibv_qp_cap, ibv_qp_init_attr, ibv_qp_state, ibv_qp_type,
};

pub(crate) use self::private::{ibv_send_flags, ibv_send_wr, ibv_sge, ibv_wr_opcode};
