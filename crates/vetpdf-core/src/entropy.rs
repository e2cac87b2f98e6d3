/// Shannon entropy of `data` in bits per byte, in `[0.0, 8.0]`.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut freq = [0usize; 256];
    for &b in data {
        freq[b as usize] += 1;
    }
    let len = data.len() as f64;
    freq.iter().filter(|&&c| c > 0).fold(0.0, |acc, &c| {
        let p = c as f64 / len;
        acc - p * p.log2()
    })
}

/// Fraction of `data` that is printable ASCII or common whitespace.
pub fn printable_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 1.0;
    }
    let printable = data
        .iter()
        .filter(|b| b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .count();
    printable as f64 / data.len() as f64
}
