use std::env;

/// Build flow:
///
/// 1. Without the `ibverbs` feature, nothing is linked: only the simulated
///    fabric is available.
/// 2. Otherwise, find `libibverbs` through `pkg-config` and generate bindings
///    for the subset of verbs the transport uses.
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    if env::var_os("CARGO_FEATURE_IBVERBS").is_none() {
        return;
    }

    // Refuse to compile on non-64-bit platforms.
    if cfg!(not(target_pointer_width = "64")) {
        panic!("the `ibverbs` backend only supports 64-bit platforms");
    }

    #[cfg(feature = "ibverbs")]
    verbs::link_and_generate();
}

#[cfg(feature = "ibverbs")]
mod verbs {
    use std::path::Path;

    use super::*;

    /// Link to the system `libibverbs` registered in `pkg-config`.
    fn link_libibverbs() -> Vec<String> {
        println!("cargo:rerun-if-env-changed=IBVERBS_INCLUDE_DIR");
        let lib = pkg_config::Config::new()
            .atleast_version("1.8.28")
            .statik(false)
            .probe("libibverbs")
            .expect("`libibverbs` not found by pkg-config");

        let mut include_dirs = lib
            .include_paths
            .iter()
            .filter_map(|p| p.to_str().map(str::to_owned))
            .collect::<Vec<_>>();
        if let Ok(dir) = env::var("IBVERBS_INCLUDE_DIR") {
            include_dirs.push(dir);
        }
        include_dirs
    }

    pub(super) fn link_and_generate() {
        let include_dirs = link_libibverbs();
        println!("cargo:rerun-if-changed=src/bindings/verbs.h");

        let include_args = include_dirs.iter().map(|p| format!("-I{}", p));
        let bindings = bindgen::builder()
            .clang_args(include_args)
            .header("src/bindings/verbs.h")
            .allowlist_function("ibv_.*")
            .allowlist_type("ibv_.*")
            .allowlist_type("_compat_ibv_port_attr")
            .opaque_type("pthread_.*")
            .blocklist_type("in6_addr")
            .blocklist_type("sockaddr.*")
            .blocklist_type("timespec")
            .bitfield_enum("ibv_access_flags")
            .bitfield_enum("ibv_qp_attr_mask")
            .bitfield_enum("ibv_send_flags")
            .bitfield_enum("ibv_wc_flags")
            .constified_enum_module("ibv_mtu")
            .constified_enum_module("ibv_port_state")
            .constified_enum_module("ibv_wc_status")
            .constified_enum_module("ibv_wc_opcode")
            .constified_enum_module("ibv_qp_type")
            .constified_enum_module("ibv_qp_state")
            .constified_enum_module("ibv_mig_state")
            .constified_enum_module("ibv_wr_opcode")
            .derive_copy(true)
            .derive_debug(false)
            .derive_default(true)
            .generate_comments(false)
            .layout_tests(false)
            .prepend_enum_name(false)
            .size_t_is_usize(true)
            .generate()
            .expect("failed to generate bindings");

        let out_dir = env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo");
        let dest = Path::new(&out_dir).join("verbs_bindings.rs");
        bindings
            .write_to_file(dest)
            .expect("failed to write bindings");
    }
}
