// Hang fixture: busy-waits on a condition derived from a register value
// pinned via inline asm, so flipping that register's low bit can leave
// the loop's exit condition permanently false.

use std::time::{Duration, Instant};

fn condition_holds(counter: u64) -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        let rcx: u64;
        unsafe {
            std::arch::asm!(
                "mov rcx, {0}",
                "mov {1}, rcx",
                in(reg) counter,
                out(reg) rcx,
                out("rcx") _,
            );
        }
        rcx & 1 == 0
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        counter & 1 == 0
    }
}

fn main() {
    let mut counter: u64 = 0;
    let deadline = Instant::now() + Duration::from_secs(3600);
    while condition_holds(counter) && Instant::now() < deadline {
        counter = counter.wrapping_add(2);
        std::thread::yield_now();
    }
}
