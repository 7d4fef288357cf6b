/*
 * Copyright 2025 OmniFS contributors
 *
 * This file is part of OmniFS.
 *
 * OmniFS is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * OmniFS is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * OmniFS. If not, see <https://www.gnu.org/licenses/>.
 */

//! `omnifsd` formats, checks and serves OmniFS containers.

mod server;

use ofs::config::Config;
use ofs::dispatch::Engine;
use ofs::instance::FsInstance;
use ofs::prompt::prompt_password;
use std::env::{self, ArgsOs};
use std::path::PathBuf;
use std::process::exit;

/// Prints command usage.
fn print_usage() {
    eprintln!("omnifsd: bad usage");
    eprintln!("Try 'omnifsd --help' for more information.");
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" omnifsd <command> <container> [config]");
    println!();
    println!("Formats, checks and serves OmniFS containers.");
    println!();
    println!("Commands:");
    println!(" format\tCreates a fresh container at the given path.");
    println!(" fsck\tChecks and repairs an unmounted container.");
    println!(" serve\tMounts the container and serves it over TCP.");
    println!();
    println!("The optional config file holds `key = value` lines; without it the");
    println!("defaults apply (100 MiB container, 4096-byte blocks, port 8080).");
}

/// Reads the container path and the optional configuration file from the
/// remaining arguments.
fn parse_target(args: &mut ArgsOs) -> (PathBuf, Config) {
    let Some(container) = args.next().map(PathBuf::from) else {
        print_usage();
        exit(1);
    };
    let cfg = match args.next().map(PathBuf::from) {
        Some(path) => Config::load(&path).unwrap_or_else(|e| {
            ofs::error("omnifsd", format_args!("{}: {e}", path.display()));
        }),
        None => Config::default(),
    };
    (container, cfg)
}

fn format_cmd(mut args: ArgsOs) {
    let (container, mut cfg) = parse_target(&mut args);
    if cfg.admin_password.is_empty() {
        cfg.admin_password =
            prompt_password("Administrator password: ").unwrap_or_else(|| exit(1));
    }
    FsInstance::format(&container, &cfg).unwrap_or_else(|e| {
        ofs::error(
            "omnifsd",
            format_args!("cannot format {}: {e}", container.display()),
        );
    });
    println!("Formatted {}", container.display());
}

fn fsck_cmd(mut args: ArgsOs) {
    let (container, _) = parse_target(&mut args);
    let report = ofs::fsck::fsck(&container).unwrap_or_else(|e| {
        ofs::error(
            "omnifsd",
            format_args!("cannot check {}: {e}", container.display()),
        );
    });
    println!("{}: {report}", container.display());
}

fn serve_cmd(mut args: ArgsOs) {
    let (container, cfg) = parse_target(&mut args);
    let inst = FsInstance::mount(&container, &cfg).unwrap_or_else(|e| {
        ofs::error(
            "omnifsd",
            format_args!("cannot mount {}: {e}", container.display()),
        );
    });
    let engine = Engine::start(inst);
    let res = server::run(engine.handle(), &cfg);
    // The listener only ever returns on failure; persist before bailing out
    engine.stop();
    if let Err(e) = res {
        ofs::error("omnifsd", format_args!("server failed: {e}"));
    }
}

fn main() {
    env_logger::init();
    let mut args = env::args_os();
    args.next();
    let Some(command) = args.next().and_then(|s| s.into_string().ok()) else {
        print_usage();
        exit(1);
    };
    match command.as_str() {
        "format" => format_cmd(args),
        "fsck" => fsck_cmd(args),
        "serve" => serve_cmd(args),
        "-h" | "--help" => print_help(),
        _ => {
            print_usage();
            exit(1);
        }
    }
}
