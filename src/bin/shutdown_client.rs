//! Shutdown Client
//!
//! Sends the reserved 2-byte shutdown datagram (or an arbitrary control
//! message ID) to a daemon's UDP reactor.
//!
//! # Exit Codes
//!
//! - `0`: Datagram sent
//! - `1`: Send failed (resolution or socket error)
//! - `2`: Invalid arguments

use std::env;
use std::net::ToSocketAddrs;
use std::process;

use corekit::net::{send_control, SHUTDOWN_MESSAGE_ID};

fn print_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "usage: {} [OPTIONS] <host:port>

OPTIONS:
    --id=<N>        Message id to send (default: {}, the shutdown id)
    --help, -h      Show this help message",
        exe.to_string_lossy(),
        SHUTDOWN_MESSAGE_ID
    );
}

fn main() {
    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "shutdown_client".into());
    let mut target: Option<String> = None;
    let mut id: u16 = SHUTDOWN_MESSAGE_ID;

    for arg in args {
        if let Some(flag) = arg.to_str() {
            if let Some(value) = flag.strip_prefix("--id=") {
                id = value.parse().unwrap_or_else(|_| {
                    eprintln!("invalid --id value: {}", value);
                    process::exit(2);
                });
                continue;
            }
            match flag {
                "--help" | "-h" => {
                    print_usage(&exe);
                    process::exit(0);
                }
                _ if flag.starts_with("--") => {
                    eprintln!("unknown flag: {}", flag);
                    print_usage(&exe);
                    process::exit(2);
                }
                _ => {}
            }
        }

        if target.is_some() {
            print_usage(&exe);
            process::exit(2);
        }
        target = Some(arg.to_string_lossy().into_owned());
    }

    let Some(target) = target else {
        print_usage(&exe);
        process::exit(2);
    };

    let addr = match target.to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                eprintln!("no address found for {}", target);
                process::exit(1);
            }
        },
        Err(err) => {
            eprintln!("cannot resolve {}: {}", target, err);
            process::exit(1);
        }
    };

    if let Err(err) = send_control(addr, id) {
        eprintln!("send to {} failed: {}", addr, err);
        process::exit(1);
    }
    println!("sent message id {} to {}", id, addr);
}
