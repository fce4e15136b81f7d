use std::hint::black_box;

/// Recurses `depth` times, then fires `event`: its callstack is at least `depth` frames deep.
#[inline(never)]
pub fn descend<R>(depth: usize, event: &mut dyn FnMut() -> R) -> R {
    if depth == 0 {
        return event();
    }
    black_box(descend(black_box(depth - 1), event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once() {
        let mut fired = 0;
        assert_eq!(
            descend(16, &mut || {
                fired += 1;
                fired
            }),
            1
        );
        assert_eq!(fired, 1);
    }
}
