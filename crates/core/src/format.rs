pub fn seconds_to_timestamp(secs: u64) -> String {
    let hours = secs / 3_600;
    let mins = secs / 60 % 60;
    let secs = secs % 60;
    if hours > 0 {
        format!("{hours:02}:{mins:02}:{secs:02}")
    } else {
        format!("{mins:02}:{secs:02}")
    }
}

pub fn progress_bar(fraction: f64, length: usize) -> String {
    const POSITION: char = '⬤';
    const TRACK: char = '▬';

    if length == 0 {
        return String::new();
    }
    let fraction = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    let location = (fraction * (length - 1) as f64).round() as usize;
    (0..length)
        .map(|i| if i == location { POSITION } else { TRACK })
        .collect()
}
