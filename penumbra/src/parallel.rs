//! Parallel processing utilities.

use rayon::prelude::*;

/// Rows handed to one rayon task when walking a plane row by row.
pub const ROWS_PER_CHUNK: usize = 16;

/// Multiplier for number of chunks relative to CPU threads.
const CHUNKS_PER_THREAD: usize = 2;

/// Fills `data[i] = f(i)` in parallel.
pub fn parallel_chunked<T, F>(data: &mut [T], f: F)
where
    T: Send + Sync,
    F: Fn(usize) -> T + Sync + Send,
{
    if data.is_empty() {
        return;
    }

    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    let chunk_size = (data.len() / num_chunks).max(1);

    data.par_chunks_mut(chunk_size)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            let start_idx = chunk_idx * chunk_size;
            for (i, val) in chunk.iter_mut().enumerate() {
                *val = f(start_idx + i);
            }
        });
}

/// Calls `f(y, row)` for every row of a row-major `width`-wide buffer, in parallel.
pub fn for_each_row<F>(data: &mut [f64], width: usize, f: F)
where
    F: Fn(usize, &mut [f64]) + Sync + Send,
{
    if data.is_empty() || width == 0 {
        return;
    }

    data.par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            let start_y = chunk_idx * ROWS_PER_CHUNK;
            for (row_in_chunk, row) in chunk.chunks_exact_mut(width).enumerate() {
                f(start_y + row_in_chunk, row);
            }
        });
}
