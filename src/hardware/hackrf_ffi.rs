//! # libhackrf FFI Bindings
//!
//! The library is loaded at runtime with libloading so the same binary runs
//! with or without libhackrf installed.
//!
//! ## Library Functions
//!
//! - `hackrf_init` / `hackrf_exit` - Library lifetime
//! - `hackrf_device_list` / `hackrf_device_list_free` - Enumeration
//! - `hackrf_open` / `hackrf_close` - Device handle
//! - `hackrf_set_freq`, `hackrf_set_sample_rate`, `hackrf_set_txvga_gain`,
//!   `hackrf_set_amp_enable` - Radio settings
//! - `hackrf_start_tx` / `hackrf_stop_tx` / `hackrf_is_streaming` - TX streaming
//!
//! ## Sample Format
//!
//! Transfers read a complex64 file (float32 I, float32 Q) and feed the
//! device signed 8-bit interleaved I/Q, scaled by 127.

use std::ffi::{c_char, c_double, c_int, c_uint, c_void};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use libloading::Library;
use num_complex::Complex32;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{Result, Error};
use crate::hardware::{CancelToken, TransmitJob};
use crate::processing::encoder::read_cf32;

const HACKRF_SUCCESS: c_int = 0;
const HACKRF_TRUE: c_int = 1;

/// Interval at which a running transfer checks for completion or stop
const STREAM_POLL: Duration = Duration::from_millis(20);

/// Opaque device handle
type HackRfDevice = c_void;

#[allow(dead_code)]
#[repr(C)]
struct HackRfTransfer {
    device: *mut HackRfDevice,
    buffer: *mut u8,
    buffer_length: c_int,
    valid_length: c_int,
    rx_ctx: *mut c_void,
    tx_ctx: *mut c_void,
}

#[allow(dead_code)]
#[repr(C)]
struct HackRfDeviceList {
    serial_numbers: *mut *mut c_char,
    usb_board_ids: *mut c_int,
    usb_device_index: *mut c_int,
    devicecount: c_int,
    usb_devices: *mut *mut c_void,
    usb_devicecount: c_int,
}

type SampleBlockCallback = unsafe extern "C" fn(*mut HackRfTransfer) -> c_int;

/// Function pointers resolved from the shared library
struct Api {
    init: unsafe extern "C" fn() -> c_int,
    exit: unsafe extern "C" fn() -> c_int,
    device_list: unsafe extern "C" fn() -> *mut HackRfDeviceList,
    device_list_free: unsafe extern "C" fn(*mut HackRfDeviceList),
    open: unsafe extern "C" fn(*mut *mut HackRfDevice) -> c_int,
    close: unsafe extern "C" fn(*mut HackRfDevice) -> c_int,
    set_freq: unsafe extern "C" fn(*mut HackRfDevice, u64) -> c_int,
    set_sample_rate: unsafe extern "C" fn(*mut HackRfDevice, c_double) -> c_int,
    set_txvga_gain: unsafe extern "C" fn(*mut HackRfDevice, c_uint) -> c_int,
    set_amp_enable: unsafe extern "C" fn(*mut HackRfDevice, u8) -> c_int,
    start_tx: unsafe extern "C" fn(*mut HackRfDevice, SampleBlockCallback, *mut c_void) -> c_int,
    stop_tx: unsafe extern "C" fn(*mut HackRfDevice) -> c_int,
    is_streaming: unsafe extern "C" fn(*mut HackRfDevice) -> c_int,
}

/// Copy a function pointer out of the library.
///
/// # Safety
/// `T` must match the C signature of `name`.
unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Result<T> {
    Ok(*lib.get::<T>(name)?)
}

impl Api {
    unsafe fn resolve(lib: &Library) -> Result<Self> {
        Ok(Self {
            init: symbol(lib, b"hackrf_init\0")?,
            exit: symbol(lib, b"hackrf_exit\0")?,
            device_list: symbol(lib, b"hackrf_device_list\0")?,
            device_list_free: symbol(lib, b"hackrf_device_list_free\0")?,
            open: symbol(lib, b"hackrf_open\0")?,
            close: symbol(lib, b"hackrf_close\0")?,
            set_freq: symbol(lib, b"hackrf_set_freq\0")?,
            set_sample_rate: symbol(lib, b"hackrf_set_sample_rate\0")?,
            set_txvga_gain: symbol(lib, b"hackrf_set_txvga_gain\0")?,
            set_amp_enable: symbol(lib, b"hackrf_set_amp_enable\0")?,
            start_tx: symbol(lib, b"hackrf_start_tx\0")?,
            stop_tx: symbol(lib, b"hackrf_stop_tx\0")?,
            is_streaming: symbol(lib, b"hackrf_is_streaming\0")?,
        })
    }
}

/// Human-readable name for a libhackrf return code
pub fn error_name(code: i32) -> &'static str {
    match code {
        0 => "HACKRF_SUCCESS",
        1 => "HACKRF_TRUE",
        -2 => "HACKRF_ERROR_INVALID_PARAM",
        -5 => "HACKRF_ERROR_NOT_FOUND",
        -6 => "HACKRF_ERROR_BUSY",
        -11 => "HACKRF_ERROR_NO_MEM",
        -1000 => "HACKRF_ERROR_LIBUSB",
        -1001 => "HACKRF_ERROR_THREAD",
        -1002 => "HACKRF_ERROR_STREAMING_THREAD_ERR",
        -1003 => "HACKRF_ERROR_STREAMING_STOPPED",
        -1004 => "HACKRF_ERROR_STREAMING_EXIT_CALLED",
        -1005 => "HACKRF_ERROR_USB_API_VERSION",
        -2000 => "HACKRF_ERROR_NOT_LAST_DEVICE",
        _ => "HACKRF_ERROR_OTHER",
    }
}

fn check(ret: c_int, op: &str) -> Result<()> {
    if ret == HACKRF_SUCCESS {
        Ok(())
    } else {
        Err(Error::HackRfError(format!("{} failed: {} ({})", op, error_name(ret), ret)))
    }
}

/// Blocking transmit surface of the native library
pub trait NativeTransfer: Send + Sync {
    /// `hackrf_init` has succeeded and `exit` has not run
    fn is_initialized(&self) -> bool;

    /// Transmit a complex64 file with `job`'s radio settings, blocking until
    /// the data runs out (never, with `repeat`), the stream dies, or `stop`
    /// is set. `stop` is checked before the device is opened and right after
    /// streaming starts, so a flag raised early is never missed.
    fn transfer(&self, file: &Path, job: &TransmitJob, stop: &CancelToken) -> Result<()>;

    /// Raise the stop flag of every transfer currently in flight
    fn stop_all(&self);
}

/// Loaded libhackrf.
///
/// Owned by the controller; `exit()` runs at most once, on request or on drop.
pub struct NativeLibrary {
    api: Api,
    _lib: Library,
    name: String,
    initialized: AtomicBool,
    /// Stop flags of running transfers
    active: Mutex<Vec<CancelToken>>,
    transfer_lock: Mutex<()>,
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("initialized", &self.initialized.load(Ordering::SeqCst))
            .finish()
    }
}

impl NativeLibrary {
    /// Load the first library in `names` that exports the full API
    pub fn load(names: &[String]) -> Result<Self> {
        for name in names {
            let lib = match unsafe { Library::new(name) } {
                Ok(lib) => lib,
                Err(e) => {
                    debug!("Could not load {}: {}", name, e);
                    continue;
                }
            };
            match unsafe { Api::resolve(&lib) } {
                Ok(api) => {
                    info!("Loaded HackRF library: {}", name);
                    return Ok(Self {
                        api,
                        _lib: lib,
                        name: name.clone(),
                        initialized: AtomicBool::new(false),
                        active: Mutex::new(Vec::new()),
                        transfer_lock: Mutex::new(()),
                    });
                }
                Err(e) => warn!("{} is missing HackRF symbols: {}", name, e),
            }
        }
        Err(Error::BackendUnavailable(format!(
            "libhackrf not found (tried {})", names.join(", ")
        )))
    }

    /// `hackrf_init`
    pub fn init(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        check(unsafe { (self.api.init)() }, "hackrf_init")?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Number of boards visible to the library
    pub fn device_count(&self) -> Result<usize> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable("hackrf_init has not run".to_string()));
        }
        let list = unsafe { (self.api.device_list)() };
        if list.is_null() {
            return Err(Error::HackRfError("hackrf_device_list returned null".to_string()));
        }
        let count = unsafe { (*list).devicecount };
        unsafe { (self.api.device_list_free)(list) };
        Ok(count.max(0) as usize)
    }

    /// `hackrf_exit`, once
    pub fn exit(&self) {
        if self.initialized.swap(false, Ordering::SeqCst) {
            let ret = unsafe { (self.api.exit)() };
            if ret == HACKRF_SUCCESS {
                info!("libhackrf shut down");
            } else {
                warn!("hackrf_exit returned {}", error_name(ret));
            }
        }
    }
}

impl NativeTransfer for NativeLibrary {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn transfer(&self, file: &Path, job: &TransmitJob, stop: &CancelToken) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::BackendUnavailable("hackrf_init has not run".to_string()));
        }
        if stop.is_cancelled() {
            debug!("Native transfer stopped before it started");
            return Ok(());
        }
        let samples = read_cf32(file)?;
        if samples.is_empty() {
            return Err(Error::ValidationError(format!("{:?} holds no samples", file)));
        }
        let ctx = Box::new(TxContext::new(to_interleaved_i8(&samples), job.plan.repeat));

        let _guard = self.transfer_lock.lock();
        let _registered = ActiveTransfer::register(&self.active, stop);
        if stop.is_cancelled() {
            debug!("Native transfer stopped before the device was opened");
            return Ok(());
        }

        let device = OpenDevice::open(&self.api)?;
        check(unsafe { (self.api.set_sample_rate)(device.ptr, job.sample_rate_hz as c_double) }, "hackrf_set_sample_rate")?;
        check(unsafe { (self.api.set_freq)(device.ptr, job.frequency_hz) }, "hackrf_set_freq")?;
        check(unsafe { (self.api.set_txvga_gain)(device.ptr, job.gain_db as c_uint) }, "hackrf_set_txvga_gain")?;
        check(unsafe { (self.api.set_amp_enable)(device.ptr, u8::from(job.amp_enable)) }, "hackrf_set_amp_enable")?;

        let ctx_ptr = &*ctx as *const TxContext as *mut c_void;
        check(unsafe { (self.api.start_tx)(device.ptr, tx_callback, ctx_ptr) }, "hackrf_start_tx")?;
        debug!("libhackrf streaming {} bytes, repeat={}", ctx.data.len(), job.plan.repeat);

        loop {
            if stop.is_cancelled() {
                info!("Native transfer stop requested");
                break;
            }
            if ctx.finished.load(Ordering::SeqCst) {
                break;
            }
            if unsafe { (self.api.is_streaming)(device.ptr) } != HACKRF_TRUE {
                break;
            }
            std::thread::sleep(STREAM_POLL);
        }

        let stopped = unsafe { (self.api.stop_tx)(device.ptr) };
        if stopped != HACKRF_SUCCESS {
            warn!("hackrf_stop_tx returned {}", error_name(stopped));
        }
        // No callbacks can reference ctx once the device is closed
        drop(device);
        drop(ctx);
        Ok(())
    }

    fn stop_all(&self) {
        let active = self.active.lock();
        for stop in active.iter() {
            stop.cancel();
        }
        debug!("Stop raised on {} native transfer(s)", active.len());
    }
}

/// Keeps a transfer's stop flag visible to `stop_all` while it runs
struct ActiveTransfer<'a> {
    registry: &'a Mutex<Vec<CancelToken>>,
    stop: CancelToken,
}

impl<'a> ActiveTransfer<'a> {
    fn register(registry: &'a Mutex<Vec<CancelToken>>, stop: &CancelToken) -> Self {
        registry.lock().push(stop.clone());
        Self { registry, stop: stop.clone() }
    }
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        self.registry.lock().retain(|t| !t.same_flag(&self.stop));
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        self.exit();
    }
}

/// Open device handle, closed on drop
struct OpenDevice<'a> {
    api: &'a Api,
    ptr: *mut HackRfDevice,
}

impl<'a> OpenDevice<'a> {
    fn open(api: &'a Api) -> Result<Self> {
        let mut ptr: *mut HackRfDevice = ptr::null_mut();
        let ret = unsafe { (api.open)(&mut ptr) };
        if ret != HACKRF_SUCCESS || ptr.is_null() {
            return Err(Error::LaunchFailure(format!(
                "hackrf_open failed: {} ({})", error_name(ret), ret
            )));
        }
        Ok(Self { api, ptr })
    }
}

impl Drop for OpenDevice<'_> {
    fn drop(&mut self) {
        let ret = unsafe { (self.api.close)(self.ptr) };
        if ret != HACKRF_SUCCESS {
            warn!("hackrf_close returned {}", error_name(ret));
        }
    }
}

/// Scale a complex sample to the device's signed 8-bit range
#[inline]
fn to_i8(x: f32) -> i8 {
    (x * 127.0).round().clamp(-127.0, 127.0) as i8
}

fn to_interleaved_i8(samples: &[Complex32]) -> Vec<i8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.push(to_i8(s.re));
        out.push(to_i8(s.im));
    }
    out
}

/// State read by the libhackrf TX thread
struct TxContext {
    data: Vec<i8>,
    pos: AtomicUsize,
    repeat: bool,
    finished: AtomicBool,
}

impl TxContext {
    fn new(data: Vec<i8>, repeat: bool) -> Self {
        Self {
            data,
            pos: AtomicUsize::new(0),
            repeat,
            finished: AtomicBool::new(false),
        }
    }

    /// Fill one USB buffer, wrapping when repeating. Returns bytes of signal written.
    fn fill(&self, out: &mut [i8]) -> usize {
        let mut pos = self.pos.load(Ordering::Relaxed);
        let mut written = 0;
        while written < out.len() {
            if pos >= self.data.len() {
                if self.repeat && !self.data.is_empty() {
                    pos = 0;
                } else {
                    break;
                }
            }
            let n = (out.len() - written).min(self.data.len() - pos);
            out[written..written + n].copy_from_slice(&self.data[pos..pos + n]);
            written += n;
            pos += n;
        }
        if written < out.len() {
            out[written..].fill(0);
            self.finished.store(true, Ordering::SeqCst);
        }
        self.pos.store(pos, Ordering::Relaxed);
        written
    }
}

unsafe extern "C" fn tx_callback(transfer: *mut HackRfTransfer) -> c_int {
    let transfer = &mut *transfer;
    let ctx = &*(transfer.tx_ctx as *const TxContext);
    let len = transfer.buffer_length.max(0) as usize;
    let out = std::slice::from_raw_parts_mut(transfer.buffer as *mut i8, len);
    let written = ctx.fill(out);
    transfer.valid_length = written as c_int;
    if ctx.finished.load(Ordering::SeqCst) && written == 0 {
        -1
    } else {
        0
    }
}
