#![macro_use]

/// Give a `NonNull` wrapper around an ibverbs object construction from the
/// nullable pointer a verbs constructor returns, raw pointer access, and the
/// thread-safety markers libibverbs permits.
macro_rules! impl_ibv_wrapper_traits {
    ($ibv_ty:ty, $wrapper_ty:ident) => {
        impl $wrapper_ty {
            /// Wrap a constructor's result, taking `errno` if it is null.
            #[inline]
            pub(crate) fn from_raw(ptr: *mut $ibv_ty) -> ::std::io::Result<Self> {
                ::std::ptr::NonNull::new(ptr)
                    .map(Self)
                    .ok_or_else(::std::io::Error::last_os_error)
            }

            #[inline]
            pub(crate) fn as_ptr(&self) -> *mut $ibv_ty {
                self.0.as_ptr()
            }
        }

        // SAFETY: ibverbs objects may be used from any thread.
        unsafe impl Send for $wrapper_ty {}
        unsafe impl Sync for $wrapper_ty {}
    };
}
