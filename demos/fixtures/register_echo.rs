// Register-flip fixture: read the first CLI argument into RAX via an
// explicit move so its value is pinned to a known register at a known
// instruction, sleep briefly so an injector with a nonzero delay window
// still lands before exit, then print whatever ended up in RAX.
//
// Built and run directly with `rustc`, no dependencies beyond libstd; see
// `fij-campaign/tests/scenarios.rs` for the harness that compiles and
// launches this.

use std::{thread, time::Duration};

fn main() {
    let arg: u64 = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(0);

    let value: u64;
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::asm!(
            "mov rax, {0}",
            "mov {1}, rax",
            in(reg) arg,
            out(reg) value,
            out("rax") _,
        );
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        value = arg;
    }

    thread::sleep(Duration::from_millis(500));
    println!("{value}");
}
