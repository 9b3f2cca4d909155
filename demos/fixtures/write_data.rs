// Memory-flip fixture: writes the bytes of a read-only data symbol
// straight through to a file, so a bit flip landing in that symbol's
// backing page (the executable's `.rodata`/`.text` mapping) shows up
// byte-for-byte in the output file.

static PAYLOAD: &[u8] = b"the quick brown fox jumps over the lazy dog\n";

fn main() {
    let out_path = std::env::args().nth(1).unwrap_or_else(|| "out.txt".to_string());
    std::fs::write(&out_path, PAYLOAD).expect("write fixture output");
}
