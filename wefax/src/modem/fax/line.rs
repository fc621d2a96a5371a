//! Row alignment: constant-skew rotation and linear clock-drift correction.

/// Circularly shifts `row` left by `offset` positions. Negative offsets are
/// normalized into `0..row.len()`.
pub fn rotate<T>(row: &mut [T], offset: isize) {
    if row.is_empty() {
        return;
    }
    let shift = offset.rem_euclid(row.len() as isize) as usize;
    if shift != 0 {
        row.rotate_left(shift);
    }
}

/// Corrects a row for a clock-rate mismatch that accumulates linearly with
/// line number: rotates by `floor(drift_per_line * line_index)` positions.
pub fn clock_correct<T>(row: &mut [T], line_index: usize, drift_per_line: f64) {
    let offset = (drift_per_line * line_index as f64).floor() as isize;
    rotate(row, offset);
}

#[cfg(test)]
mod tests {
    use crate::modem::fax::line::{
        clock_correct,
        rotate,
    };

    #[test]
    fn rotation_round_trips() {
        let original: Vec<u8> = (0..=255).collect();
        for offset in [-1000, -256, -17, -1, 0, 1, 17, 255, 256, 1000] {
            let mut row = original.clone();
            rotate(&mut row, offset);
            rotate(&mut row, -offset);
            assert_eq!(row, original, "offset {offset}");
        }
    }

    #[test]
    fn rotation_shifts_left() {
        let mut row = [1u8, 2, 3, 4];
        rotate(&mut row, 1);
        assert_eq!(row, [2, 3, 4, 1]);

        let mut row = [1u8, 2, 3, 4];
        rotate(&mut row, -1);
        assert_eq!(row, [4, 1, 2, 3]);
    }

    #[test]
    fn rotation_of_an_empty_row_is_a_no_op() {
        let mut row: [u8; 0] = [];
        rotate(&mut row, 3);
    }

    #[test]
    fn zero_drift_is_the_identity() {
        let original: Vec<f64> = (0..100).map(f64::from).collect();
        for line_index in [0, 1, 57, 4000] {
            let mut row = original.clone();
            clock_correct(&mut row, line_index, 0.0);
            assert_eq!(row, original, "line {line_index}");
        }
    }

    #[test]
    fn drift_accumulates_with_line_number() {
        let original: Vec<u8> = (0..10).collect();

        let mut row = original.clone();
        clock_correct(&mut row, 4, 0.5);
        // floor(0.5 * 4) = 2
        assert_eq!(row, [2, 3, 4, 5, 6, 7, 8, 9, 0, 1]);

        let mut row = original.clone();
        clock_correct(&mut row, 3, -0.5);
        // floor(-0.5 * 3) = -2
        assert_eq!(row, [8, 9, 0, 1, 2, 3, 4, 5, 6, 7]);
    }
}
