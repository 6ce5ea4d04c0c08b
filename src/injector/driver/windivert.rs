//! WinDivert dynamic binding
//!
//! Resolves the five WinDivert entry points from `WinDivert.dll` at runtime
//! via `LoadLibraryW`/`GetProcAddress`, so the injector has no import-table
//! dependency on the driver package. The module stays loaded for the process
//! lifetime once resolution succeeds; opening the driver requires
//! administrator privileges.

use std::ffi::{CString, OsStr};
use std::os::windows::ffi::OsStrExt;

use once_cell::sync::OnceCell;
use windows::core::{PCSTR, PCWSTR};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

use super::{DivertAddress, DivertDriver, DivertHandle, DivertLayer, DivertShutdown};
use crate::injector::{InjectorError, InjectorResult};

const DLL_NAME: &str = "WinDivert.dll";

type OpenFn = unsafe extern "system" fn(*const u8, u32, i16, u64) -> isize;
type RecvFn =
    unsafe extern "system" fn(isize, *mut core::ffi::c_void, u32, *mut u32, *mut DivertAddress)
        -> i32;
type SendFn = unsafe extern "system" fn(
    isize,
    *const core::ffi::c_void,
    u32,
    *mut u32,
    *const DivertAddress,
) -> i32;
type ShutdownFn = unsafe extern "system" fn(isize, u32) -> i32;
type CloseFn = unsafe extern "system" fn(isize) -> i32;

/// Resolved entry points. Held process-wide after the first successful load.
struct Api {
    open: OpenFn,
    recv: RecvFn,
    send: SendFn,
    shutdown: ShutdownFn,
    close: CloseFn,
}

static API: OnceCell<Api> = OnceCell::new();

fn resolve(module: HMODULE, name: &'static [u8]) -> InjectorResult<unsafe extern "system" fn() -> isize> {
    // `name` must be NUL-terminated.
    unsafe { GetProcAddress(module, PCSTR(name.as_ptr())) }.ok_or_else(|| {
        InjectorError::DriverUnavailable(format!(
            "{} symbol missing from {}",
            String::from_utf8_lossy(&name[..name.len() - 1]),
            DLL_NAME
        ))
    })
}

fn load_api() -> InjectorResult<Api> {
    let wide: Vec<u16> = OsStr::new(DLL_NAME)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    // The module handle is intentionally never freed; the binding lives for
    // the rest of the process.
    let module = unsafe { LoadLibraryW(PCWSTR(wide.as_ptr())) }
        .map_err(|e| InjectorError::DriverUnavailable(format!("{} not loaded: {}", DLL_NAME, e)))?;

    let api = unsafe {
        Api {
            open: std::mem::transmute::<_, OpenFn>(resolve(module, b"WinDivertOpen\0")?),
            recv: std::mem::transmute::<_, RecvFn>(resolve(module, b"WinDivertRecv\0")?),
            send: std::mem::transmute::<_, SendFn>(resolve(module, b"WinDivertSend\0")?),
            shutdown: std::mem::transmute::<_, ShutdownFn>(resolve(
                module,
                b"WinDivertShutdown\0",
            )?),
            close: std::mem::transmute::<_, CloseFn>(resolve(module, b"WinDivertClose\0")?),
        }
    };

    log::info!("WinDivert entry points resolved");
    Ok(api)
}

fn api() -> InjectorResult<&'static Api> {
    API.get_or_try_init(load_api)
}

/// Driver client backed by the real WinDivert kernel driver.
#[derive(Debug, Default)]
pub struct WinDivertDriver;

impl WinDivertDriver {
    pub fn new() -> Self {
        Self
    }
}

impl DivertDriver for WinDivertDriver {
    fn ensure_loaded(&self) -> InjectorResult<()> {
        api().map(|_| ())
    }

    fn open(
        &self,
        filter: &str,
        layer: DivertLayer,
        priority: i16,
        flags: u64,
    ) -> InjectorResult<DivertHandle> {
        let api = api()?;
        let filter = CString::new(filter)
            .map_err(|_| InjectorError::Open("filter contains NUL".to_string()))?;

        let raw = unsafe {
            (api.open)(
                filter.as_ptr() as *const u8,
                layer as u32,
                priority,
                flags,
            )
        };
        let handle = DivertHandle(raw);
        if !handle.is_valid() {
            return Err(InjectorError::Open(format!(
                "WinDivertOpen failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(handle)
    }

    fn recv(
        &self,
        handle: DivertHandle,
        packet: &mut [u8],
        addr: &mut DivertAddress,
    ) -> InjectorResult<usize> {
        let api = api()?;
        let mut recv_len = 0u32;
        let ok = unsafe {
            (api.recv)(
                handle.0,
                packet.as_mut_ptr().cast(),
                packet.len() as u32,
                &mut recv_len,
                addr,
            )
        };
        if ok == 0 {
            return Err(InjectorError::Recv(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(recv_len as usize)
    }

    fn send(
        &self,
        handle: DivertHandle,
        packet: &[u8],
        addr: &DivertAddress,
    ) -> InjectorResult<usize> {
        let api = api()?;
        let ok = unsafe {
            (api.send)(
                handle.0,
                packet.as_ptr().cast(),
                packet.len() as u32,
                std::ptr::null_mut(),
                addr,
            )
        };
        if ok == 0 {
            return Err(InjectorError::Send(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(packet.len())
    }

    fn shutdown(&self, handle: DivertHandle, how: DivertShutdown) -> InjectorResult<()> {
        let api = api()?;
        let ok = unsafe { (api.shutdown)(handle.0, how as u32) };
        if ok == 0 {
            return Err(InjectorError::Shutdown(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(())
    }

    fn close(&self, handle: DivertHandle) -> InjectorResult<()> {
        let api = api()?;
        let ok = unsafe { (api.close)(handle.0) };
        if ok == 0 {
            return Err(InjectorError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}
