//! Phantom Injector Testbench
//!
//! Run with: cargo run --bin injector_testbench -- <server_ip> <server_port>
//! Without arguments the endpoint is read from injector_settings.json in the
//! working directory.
//!
//! On Windows this drives the real WinDivert driver and requires
//! Administrator privileges plus WinDivert.dll on the DLL search path.
//! On other hosts it runs a scripted dry-run against the in-memory stub.

use std::path::Path;

use phantomsyn::settings::{load_settings, InjectorSettings};

const SETTINGS_FILE: &str = "injector_settings.json";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    println!("=== PhantomSyn Injector Testbench ===\n");

    println!("[1] Resolving target endpoint...");
    let args: Vec<String> = std::env::args().collect();
    let settings = if args.len() > 2 {
        InjectorSettings {
            server_ip: args[1].clone(),
            server_port: args[2].parse().unwrap_or(0),
        }
    } else {
        load_settings(Path::new(SETTINGS_FILE))
    };

    if !settings.is_valid() {
        eprintln!("ERROR: No target endpoint configured!");
        eprintln!("Usage: injector_testbench <server_ip> <server_port>");
        eprintln!("Or provide {} in the working directory.", SETTINGS_FILE);
        std::process::exit(1);
    }
    println!(
        "    ✓ Target: {}:{}\n",
        settings.server_ip, settings.server_port
    );

    run(&settings);
}

#[cfg(windows)]
fn run(settings: &InjectorSettings) {
    use phantomsyn::PhantomEngine;

    println!("[2] Checking administrator privileges...");
    if !is_admin() {
        eprintln!("ERROR: Administrator privileges required!");
        eprintln!("Please run this program as Administrator.");
        std::process::exit(1);
    }
    println!("    ✓ Running as Administrator\n");

    println!("[3] Starting injector against the WinDivert driver...");
    let engine = PhantomEngine::windivert();
    if !engine.start(&settings.server_ip, settings.server_port) {
        eprintln!("ERROR: Start failed - is WinDivert.dll on the search path?");
        std::process::exit(1);
    }
    println!("    ✓ Injector running\n");

    println!("[4] Press Enter to stop...");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    engine.stop();
    println!("    ✓ Injector stopped");
    println!("\n=== Done ===");
}

#[cfg(not(windows))]
fn run(settings: &InjectorSettings) {
    use std::sync::Arc;
    use std::time::Duration;

    use phantomsyn::{PhantomEngine, StubDriver};

    println!("[2] Non-Windows host: running stub dry-run...");
    let stub = StubDriver::new();
    let engine = PhantomEngine::new(Arc::new(stub.clone()));

    // Same outbound flow twice, then a FIN: one phantom expected.
    stub.push_packet(sample_syn(settings.server_port, 0x02));
    stub.push_packet(sample_syn(settings.server_port, 0x10));
    stub.push_packet(sample_syn(settings.server_port, 0x11));

    if !engine.start(&settings.server_ip, settings.server_port) {
        eprintln!("ERROR: Start failed");
        std::process::exit(1);
    }
    std::thread::sleep(Duration::from_millis(200));
    engine.stop();

    let sends = stub.sends();
    let phantoms = sends.iter().filter(|s| s.data[8] == 5).count();
    println!("    ✓ {} sends recorded, {} phantom(s)\n", sends.len(), phantoms);
    println!("=== Done ===");
}

/// Minimal outbound IPv4+TCP segment for the dry-run.
#[cfg(not(windows))]
fn sample_syn(dst_port: u16, flags: u8) -> Vec<u8> {
    let mut buf = vec![0u8; 40];
    buf[0] = 0x45;
    buf[2..4].copy_from_slice(&40u16.to_be_bytes());
    buf[8] = 64;
    buf[9] = 6;
    buf[12..16].copy_from_slice(&[10, 1, 2, 3]);
    buf[16..20].copy_from_slice(&[10, 0, 0, 1]);
    buf[20..22].copy_from_slice(&54321u16.to_be_bytes());
    buf[22..24].copy_from_slice(&dst_port.to_be_bytes());
    buf[32] = 0x50;
    buf[33] = flags;
    buf
}

#[cfg(windows)]
fn is_admin() -> bool {
    unsafe {
        use windows::Win32::Foundation::{CloseHandle, HANDLE};
        use windows::Win32::Security::{
            GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
        };
        use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

        let mut token_handle = HANDLE::default();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token_handle).is_err() {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION::default();
        let mut return_length: u32 = 0;
        let result = GetTokenInformation(
            token_handle,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut core::ffi::c_void),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        );
        let _ = CloseHandle(token_handle);

        result.is_ok() && elevation.TokenIsElevated != 0
    }
}
