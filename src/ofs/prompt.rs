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

//! Password prompting for the command line wrapper.

use libc::{ECHO, ECHOE, ICANON, STDIN_FILENO, TCSANOW, VMIN, tcgetattr, tcsetattr, termios};
use std::io::{BufRead, Write};
use std::mem::MaybeUninit;
use std::{fmt, io};

/// Shows `prompt` and reads one line with the terminal echo disabled.
///
/// Returns `None` when the input stream is closed before a line arrives.
pub fn prompt_password<P: fmt::Display>(prompt: P) -> Option<String> {
    let saved = unsafe {
        let mut t: termios = MaybeUninit::zeroed().assume_init();
        tcgetattr(STDIN_FILENO, &mut t);
        t
    };
    // Raw, echo-less input while the password is typed
    let mut silent = saved;
    silent.c_lflag &= !(ICANON | ECHO | ECHOE);
    silent.c_cc[VMIN] = 1;
    unsafe {
        tcsetattr(STDIN_FILENO, TCSANOW, &silent);
    }

    print!("{prompt}");
    let _ = io::stdout().flush();
    let line = io::stdin().lock().lines().next();

    println!();
    unsafe {
        tcsetattr(STDIN_FILENO, TCSANOW, &saved);
    }
    Some(line?.unwrap_or_default())
}
