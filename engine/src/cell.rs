use std::cell::UnsafeCell;

/// Interior-mutable slot owned by the real-time callback.
///
/// Exclusive access is not checked. Callers must guarantee a single
/// accessor at a time, which the session does by only touching the slot
/// while no callback registration is live.
#[derive(Debug)]
pub(crate) struct RtCell<T> {
    data: UnsafeCell<T>,
}

impl<T> RtCell<T> {
    pub(crate) fn new(data: T) -> Self {
        RtCell {
            data: UnsafeCell::new(data),
        }
    }

    /// # Safety
    ///
    /// No other reference obtained from this cell may be alive.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    pub(crate) fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

unsafe impl<T: Send> Send for RtCell<T> {}
unsafe impl<T: Send> Sync for RtCell<T> {}
