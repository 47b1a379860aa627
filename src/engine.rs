use std::str::FromStr;

use super::*;

pub const DEFAULT_THRESHOLD: usize = 10_000;

/// How a region too large for one task is partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Split {
	/// Four quadrants around the row midpoint and the column midpoint.
	#[default]
	Quadrants,
	/// Two halves across the longer side.
	LongestAxis,
}

impl FromStr for Split {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Split, String> {
		match s {
			"quadrants" => Ok(Split::Quadrants),
			"longest-axis" => Ok(Split::LongestAxis),
			_ => Err(format!("Unknown split '{}', expected 'quadrants' or 'longest-axis'", s)),
		}
	}
}

impl fmt::Display for Split {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(match self {
			Split::Quadrants => "quadrants",
			Split::LongestAxis => "longest-axis",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
	/// Regions of at most this many cells are computed by a single task.
	pub threshold: usize,
	/// Worker threads; 0 means one per hardware thread.
	pub workers: usize,
	pub split: Split,
}

impl Default for EngineConfig {
	fn default() -> Self {
		EngineConfig {
			threshold: DEFAULT_THRESHOLD,
			workers: 0,
			split: Split::Quadrants,
		}
	}
}

/// Disjoint mutable view of one region of a destination plane.
///
/// Each row is a slice covering exactly the region's columns, so two tiles
/// obtained by splitting can never alias.
pub(crate) struct Tile<'a> {
	region: Region,
	rows: Vec<&'a mut [Cell]>,
}

impl Plane {
	pub(crate) fn tile(&mut self, region: Region) -> Tile<'_> {
		let stride = self.stride();
		let rows = self.cells
			.chunks_mut(stride)
			.skip(region.start_row)
			.take(region.rows())
			.map(|row| &mut row[region.start_col..region.end_col])
			.collect();
		Tile {
			region,
			rows,
		}
	}
}

impl<'a> Tile<'a> {
	/// Top half gets `rows / 2` rows.
	fn split_rows(mut self) -> (Tile<'a>, Tile<'a>) {
		let mid = self.rows.len() / 2;
		let lower = self.rows.split_off(mid);
		let (top, bottom) = self.region.split_rows(mid);
		(
			Tile { region: top, rows: self.rows },
			Tile { region: bottom, rows: lower },
		)
	}

	/// Left half gets `cols / 2` columns.
	fn split_cols(self) -> (Tile<'a>, Tile<'a>) {
		let mid = self.region.cols() / 2;
		let (left_rows, right_rows): (Vec<_>, Vec<_>) = self.rows
			.into_iter()
			.map(|row| row.split_at_mut(mid))
			.unzip();
		let (left, right) = self.region.split_cols(mid);
		(
			Tile { region: left, rows: left_rows },
			Tile { region: right, rows: right_rows },
		)
	}

	/// Sequential sweep of the whole tile.
	fn fill(self, src: &Plane) -> Result<bool> {
		let Region { start_row, start_col, .. } = self.region;
		let mut changed = false;
		for (k, out) in self.rows.into_iter().enumerate() {
			let i = start_row + k;
			let (up, mid, down) = match (i.checked_sub(1).and_then(|r| src.row(r)), src.row(i), src.row(i + 1)) {
				(Some(up), Some(mid), Some(down)) => (up, mid, down),
				_ => return Err(Error::Computation(format!(
					"Row {} has no neighbours in a {}x{} plane", i, src.width(), src.height()))),
			};
			if start_col == 0 || start_col + out.len() + 1 > mid.len() {
				return Err(Error::Computation(format!(
					"Columns {}..{} have no neighbours in a {}x{} plane",
					start_col, start_col + out.len(), src.width(), src.height())));
			}
			for (x, cell) in out.iter_mut().enumerate() {
				let j = start_col + x;
				let next = topple(mid[j], up[j], down[j], mid[j - 1], mid[j + 1]);
				if next != mid[j] {
					changed = true;
				}
				*cell = next;
			}
		}
		Ok(changed)
	}
}

fn check(src: &Plane, dest: &Plane, region: Region) -> Result<()> {
	if (src.width(), src.height()) != (dest.width(), dest.height()) {
		return Err(Error::Computation(format!(
			"Source is {}x{} but destination is {}x{}",
			src.width(), src.height(), dest.width(), dest.height())));
	}
	if region.is_empty() || !src.interior().contains(&region) {
		return Err(Error::Computation(format!(
			"Region {:?} is empty or outside the interior {:?}", region, src.interior())));
	}
	Ok(())
}

/// Single-threaded sweep, the baseline every other engine must agree with.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialEngine;

impl UpdateEngine for SequentialEngine {
	fn update(&self, src: &Plane, dest: &mut Plane, region: Region) -> Result<bool> {
		check(src, dest, region)?;
		dest.tile(region).fill(src)
	}
}

/// Recursive fork/join update on a dedicated work-stealing pool.
///
/// The pool lives as long as the engine, so build one engine per simulation
/// and reuse it for every pass.
pub struct ParallelEngine {
	config: EngineConfig,
	pool: rayon::ThreadPool,
}

impl ParallelEngine {
	pub fn new(config: EngineConfig) -> Result<ParallelEngine> {
		if config.threshold == 0 {
			return Err(Error::Config("Threshold must be at least 1 cell".to_owned()));
		}
		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads(config.workers)
			.thread_name(|i| format!("sandpile-{}", i))
			.build()?;
		debug!(
			workers = pool.current_num_threads(),
			threshold = config.threshold,
			split = %config.split,
			"worker pool ready"
		);
		Ok(ParallelEngine {
			config,
			pool,
		})
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn workers(&self) -> usize {
		self.pool.current_num_threads()
	}

	fn compute(&self, src: &Plane, tile: Tile<'_>) -> Result<bool> {
		let region = tile.region;
		if region.area() <= self.config.threshold {
			return tile.fill(src);
		}
		let (tall, wide) = (region.rows() > 1, region.cols() > 1);
		match self.config.split {
			Split::Quadrants => match (tall, wide) {
				(true, true) => {
					let (top, bottom) = tile.split_rows();
					let (top_left, top_right) = top.split_cols();
					let (bottom_left, bottom_right) = bottom.split_cols();
					let ((a, b), (c, d)) = rayon::join(
						|| rayon::join(|| self.compute(src, top_left), || self.compute(src, top_right)),
						|| rayon::join(|| self.compute(src, bottom_left), || self.compute(src, bottom_right)),
					);
					Ok(a? | b? | c? | d?)
				}
				(true, false) => self.halves(src, tile.split_rows()),
				(false, true) => self.halves(src, tile.split_cols()),
				(false, false) => tile.fill(src),
			},
			Split::LongestAxis => {
				if tall && region.rows() >= region.cols() {
					self.halves(src, tile.split_rows())
				} else if wide {
					self.halves(src, tile.split_cols())
				} else {
					tile.fill(src)
				}
			}
		}
	}

	fn halves(&self, src: &Plane, (first, second): (Tile<'_>, Tile<'_>)) -> Result<bool> {
		let (a, b) = rayon::join(|| self.compute(src, first), || self.compute(src, second));
		Ok(a? | b?)
	}
}

impl UpdateEngine for ParallelEngine {
	fn update(&self, src: &Plane, dest: &mut Plane, region: Region) -> Result<bool> {
		check(src, dest, region)?;
		let tile = dest.tile(region);
		let changed = self.pool.install(|| self.compute(src, tile))?;
		trace!(?region, changed, "pass");
		Ok(changed)
	}
}
