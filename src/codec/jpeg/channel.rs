/// One image component of a JPEG frame.
///
/// Lossy channels keep their samples block by block (64 values per block,
/// blocks in raster order); lossless channels keep them row by row.
#[derive(Debug, Clone, Default)]
pub struct JpegChannel {
    pub sampling_x: u32,
    pub sampling_y: u32,
    pub quant_table: usize,
    pub dc_table: usize,
    pub ac_table: usize,

    /// Blocks (lossy) or samples (lossless) of this channel in one MCU.
    pub block_mcu_x: u32,
    pub block_mcu_y: u32,

    pub default_dc: i32,
    pub last_dc: i32,

    pub size_x: u32,
    pub size_y: u32,
    pub buffer: Vec<i32>,

    /// First row of the current restart interval, predicted from the left.
    pub line_start: u32,
    /// The next lossless sample is predicted from `default_dc`.
    pub reset_pending: bool,
}

impl JpegChannel {
    pub fn new(sampling_x: u32, sampling_y: u32, quant_table: usize) -> Self {
        Self {
            sampling_x,
            sampling_y,
            quant_table,
            block_mcu_x: 1,
            block_mcu_y: 1,
            ..Self::default()
        }
    }

    pub fn allocate(&mut self, size_x: u32, size_y: u32) {
        self.size_x = size_x;
        self.size_y = size_y;
        self.buffer = vec![0; size_x as usize * size_y as usize];
    }

    pub fn blocks_per_row(&self) -> u32 {
        self.size_x / 8
    }

    pub fn block_count(&self) -> usize {
        self.buffer.len() / 64
    }

    /// Mutable view of the 8x8 block at `(block_x, block_y)`.
    pub fn block_mut(&mut self, block_x: u32, block_y: u32) -> Option<&mut [i32; 64]> {
        if block_x >= self.blocks_per_row() {
            return None;
        }
        let start = (block_y as usize * self.blocks_per_row() as usize + block_x as usize) * 64;
        self.buffer
            .get_mut(start..start + 64)
            .and_then(|slice| slice.try_into().ok())
    }

    pub fn block(&self, block_x: u32, block_y: u32) -> Option<&[i32; 64]> {
        if block_x >= self.blocks_per_row() {
            return None;
        }
        let start = (block_y as usize * self.blocks_per_row() as usize + block_x as usize) * 64;
        self.buffer
            .get(start..start + 64)
            .and_then(|slice| slice.try_into().ok())
    }

    /// Sample at `(x, y)` whatever the buffer organisation.
    pub fn sample(&self, x: u32, y: u32, lossless: bool) -> i32 {
        let x = x.min(self.size_x.saturating_sub(1));
        let y = y.min(self.size_y.saturating_sub(1));
        let index = if lossless {
            y as usize * self.size_x as usize + x as usize
        } else {
            let block = (y / 8) as usize * self.blocks_per_row() as usize + (x / 8) as usize;
            block * 64 + (y % 8) as usize * 8 + (x % 8) as usize
        };
        self.buffer.get(index).copied().unwrap_or(0)
    }

    pub fn set_sample(&mut self, x: u32, y: u32, lossless: bool, value: i32) {
        let index = if lossless {
            y as usize * self.size_x as usize + x as usize
        } else {
            let block = (y / 8) as usize * self.blocks_per_row() as usize + (x / 8) as usize;
            block * 64 + (y % 8) as usize * 8 + (x % 8) as usize
        };
        if let Some(slot) = self.buffer.get_mut(index) {
            *slot = value;
        }
    }

    /// Starts a scan or restart interval whose first row is `line`.
    pub fn restart(&mut self, line: u32) {
        self.last_dc = self.default_dc;
        self.line_start = line;
        self.reset_pending = true;
    }

    /// Lossless prediction for the sample at `(x, y)` with the predictor
    /// numbering of T.81 Table H.1. The first row of an interval uses the
    /// left neighbour, the first column the one above.
    ///
    /// Neighbours are read back from the reconstructed samples, so the caller
    /// must store each sample with `set_sample` before predicting the next one
    /// in raster order. No separate buffer of pending differences is kept.
    pub fn predict(&mut self, x: u32, y: u32, selection: u32) -> i32 {
        if self.reset_pending {
            self.reset_pending = false;
            return self.default_dc;
        }
        if selection == 0 {
            return 0;
        }
        let at = |x: u32, y: u32| self.sample(x, y, true);
        if y <= self.line_start {
            return if x == 0 { self.default_dc } else { at(x - 1, y) };
        }
        if x == 0 {
            return at(0, y - 1);
        }

        let ra = at(x - 1, y);
        let rb = at(x, y - 1);
        let rc = at(x - 1, y - 1);
        match selection {
            1 => ra,
            2 => rb,
            3 => rc,
            4 => ra + rb - rc,
            5 => ra + ((rb - rc) >> 1),
            6 => rb + ((ra - rc) >> 1),
            7 => (ra + rb) >> 1,
            _ => ra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lossless_channel() -> JpegChannel {
        let mut channel = JpegChannel::new(1, 1, 0);
        channel.default_dc = 128;
        channel.allocate(3, 2);
        channel.buffer = vec![10, 20, 30, 40, 50, 60];
        channel
    }

    #[test]
    fn predictors_follow_table_h1() {
        let mut channel = lossless_channel();
        // Ra = 40, Rb = 20, Rc = 10 at (1, 1)
        let expected = [40, 20, 10, 50, 45, 35, 30];
        for (selection, value) in (1..=7).zip(expected) {
            assert_eq!(channel.predict(1, 1, selection), value, "predictor {}", selection);
        }
    }

    #[test]
    fn borders_and_restarts() {
        let mut channel = lossless_channel();
        channel.restart(0);
        assert_eq!(channel.predict(0, 0, 4), 128);
        assert_eq!(channel.predict(2, 0, 4), 20);
        assert_eq!(channel.predict(0, 1, 4), 10);
        assert_eq!(channel.predict(1, 1, 0), 0);
    }

    #[test]
    fn samples_reconstruct_one_at_a_time() {
        let source = lossless_channel();
        let mut encoder = lossless_channel();
        encoder.restart(0);
        let mut differences = Vec::new();
        for y in 0..2 {
            for x in 0..3 {
                differences.push(source.sample(x, y, true) - encoder.predict(x, y, 4));
            }
        }

        let mut decoder = JpegChannel::new(1, 1, 0);
        decoder.default_dc = 128;
        decoder.allocate(3, 2);
        decoder.restart(0);
        let mut pending = differences.into_iter();
        for y in 0..2 {
            for x in 0..3 {
                let prediction = decoder.predict(x, y, 4);
                let difference = pending.next().unwrap();
                decoder.set_sample(x, y, true, prediction + difference);
            }
        }
        assert_eq!(decoder.buffer, source.buffer);
    }

    #[test]
    fn lossy_samples_are_block_ordered() {
        let mut channel = JpegChannel::new(1, 1, 0);
        channel.allocate(16, 8);
        channel.set_sample(9, 1, false, 7);
        assert_eq!(channel.buffer[64 + 8 + 1], 7);
        assert_eq!(channel.sample(9, 1, false), 7);
        assert_eq!(channel.block(1, 0).map(|block| block[9]), Some(7));
    }
}
