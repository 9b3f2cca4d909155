// Crash fixture: a CPU-bound loop with no I/O and no syscalls in its hot
// path, so flipping a bit of RIP while it runs almost always redirects
// execution into an invalid instruction stream or an unmapped page.

fn main() {
    let mut acc: u64 = 0;
    loop {
        acc = acc.wrapping_mul(6364136223846793005).wrapping_add(1);
        std::hint::black_box(acc);
    }
}
