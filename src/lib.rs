use std::{
	fmt,
	fs,
	io,
	mem,
	path::Path,
};

use thiserror::Error;
use tracing::{debug, trace};

mod engine;
mod input;

pub use engine::{
	EngineConfig,
	ParallelEngine,
	SequentialEngine,
	Split,
	DEFAULT_THRESHOLD,
};
pub use input::{parse_grid, read_grid};

pub type Cell = u32;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
	#[error("Invalid input: {0}")]
	InvalidInput(String),

	#[error("IO error: {0}")]
	Io(#[from] io::Error),

	#[error("Computation failed: {0}")]
	Computation(String),

	#[error("Invalid configuration: {0}")]
	Config(String),

	#[error("Can't start worker pool: {0}")]
	Pool(#[from] rayon::ThreadPoolBuildError),
}

/// New value of a cell given its own previous value and those of its four neighbours.
///
/// Cannot overflow: `v % 4 + 4 * (Cell::MAX / 4) == Cell::MAX` at worst.
#[inline]
pub fn topple(centre: Cell, up: Cell, down: Cell, left: Cell, right: Cell) -> Cell {
	centre % 4 + up / 4 + down / 4 + left / 4 + right / 4
}

/// A rectangle `[start_row, end_row) x [start_col, end_col)` of plane coordinates.
///
/// Plane coordinates include the border, so the interior of a `width x height`
/// grid is `[1, height + 1) x [1, width + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
	pub start_row: usize,
	pub end_row: usize,
	pub start_col: usize,
	pub end_col: usize,
}

impl Region {
	pub fn new(start_row: usize, end_row: usize, start_col: usize, end_col: usize) -> Region {
		Region {
			start_row,
			end_row,
			start_col,
			end_col,
		}
	}

	pub fn rows(&self) -> usize {
		self.end_row.saturating_sub(self.start_row)
	}

	pub fn cols(&self) -> usize {
		self.end_col.saturating_sub(self.start_col)
	}

	pub fn area(&self) -> usize {
		self.rows() * self.cols()
	}

	pub fn is_empty(&self) -> bool {
		self.area() == 0
	}

	pub fn contains(&self, other: &Region) -> bool {
		other.start_row >= self.start_row && other.end_row <= self.end_row &&
			other.start_col >= self.start_col && other.end_col <= self.end_col
	}

	/// Splits after the first `at` rows.
	pub fn split_rows(&self, at: usize) -> (Region, Region) {
		let mid = self.start_row + at;
		(
			Region { end_row: mid, ..*self },
			Region { start_row: mid, ..*self },
		)
	}

	/// Splits after the first `at` columns.
	pub fn split_cols(&self, at: usize) -> (Region, Region) {
		let mid = self.start_col + at;
		(
			Region { end_col: mid, ..*self },
			Region { start_col: mid, ..*self },
		)
	}
}

/// One padded cell buffer: the grid surrounded by a ring of zeros that is never written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
	width: usize,
	height: usize,
	cells: Vec<Cell>,
}

impl Plane {
	/// Panics if the padded size overflows `usize`; [`Plane::from_rows`] reports that as an error.
	pub fn zeroed(width: usize, height: usize) -> Plane {
		Plane {
			width,
			height,
			cells: vec![0; (width + 2) * (height + 2)],
		}
	}

	pub fn from_rows(rows: &[Vec<Cell>]) -> Result<Plane> {
		let height = rows.len();
		let width = rows.first().map_or(0, |row| row.len());
		Plane::with_interior(width, height, rows)
	}

	/// Checks `rows` against the claimed size before allocating anything.
	fn with_interior(width: usize, height: usize, rows: &[Vec<Cell>]) -> Result<Plane> {
		if rows.len() != height {
			return Err(Error::InvalidInput(format!("Expected {} rows, got {}", height, rows.len())));
		}
		if let Some((i, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != width) {
			return Err(Error::InvalidInput(format!("Row {} has {} values, expected {}", i + 1, row.len(), width)));
		}
		let len = width.checked_add(2)
			.zip(height.checked_add(2))
			.and_then(|(x, y)| x.checked_mul(y))
			.ok_or_else(|| Error::InvalidInput(format!("Grid {}x{} is too large", width, height)))?;
		let mut plane = Plane {
			width,
			height,
			cells: vec![0; len],
		};
		let stride = plane.stride();
		for (i, row) in rows.iter().enumerate() {
			let start = (i + 1) * stride + 1;
			plane.cells[start..start + width].copy_from_slice(row);
		}
		Ok(plane)
	}

	pub fn width(&self) -> usize {
		self.width
	}

	pub fn height(&self) -> usize {
		self.height
	}

	/// Length of a padded row.
	pub fn stride(&self) -> usize {
		self.width + 2
	}

	pub fn interior(&self) -> Region {
		Region::new(1, self.height + 1, 1, self.width + 1)
	}

	/// A full padded row, border cells included.
	pub fn row(&self, i: usize) -> Option<&[Cell]> {
		let stride = self.stride();
		self.cells.get(i * stride..(i + 1) * stride)
	}

	pub fn get(&self, row: usize, col: usize) -> Option<Cell> {
		if col >= self.stride() {
			return None;
		}
		self.cells.get(row * self.stride() + col).copied()
	}

	pub fn view(&self) -> View<'_> {
		View { plane: self }
	}
}

/// Computes `dest[region]` from `src` and reports whether any cell in the region changed.
pub trait UpdateEngine {
	fn update(&self, src: &Plane, dest: &mut Plane, region: Region) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct Grid {
	src: Plane,
	dest: Plane,
}

impl Grid {
	pub fn new(width: usize, height: usize, values: &[Vec<Cell>]) -> Result<Grid> {
		if width == 0 || height == 0 {
			return Err(Error::InvalidInput(format!("Empty grid {}x{}", width, height)));
		}
		let src = Plane::with_interior(width, height, values)?;
		Ok(Grid {
			dest: Plane::zeroed(width, height),
			src,
		})
	}

	pub fn from_rows(rows: &[Vec<Cell>]) -> Result<Grid> {
		let width = rows.first().map_or(0, |row| row.len());
		Grid::new(width, rows.len(), rows)
	}

	pub fn width(&self) -> usize {
		self.src.width
	}

	pub fn height(&self) -> usize {
		self.src.height
	}

	/// One full pass over the interior. On error the current state is left as it was.
	pub fn step<E: UpdateEngine + ?Sized>(&mut self, engine: &E) -> Result<bool> {
		let region = self.src.interior();
		let changed = engine.update(&self.src, &mut self.dest, region)?;
		mem::swap(&mut self.src, &mut self.dest);
		Ok(changed)
	}

	pub fn snapshot(&self) -> View<'_> {
		self.src.view()
	}

	pub fn total(&self) -> u64 {
		self.snapshot().total()
	}
}

impl fmt::Display for Grid {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.snapshot())
	}
}

/// Read-only access to the interior of a plane, in `(x, y)` grid coordinates.
#[derive(Debug, Clone, Copy)]
pub struct View<'a> {
	plane: &'a Plane,
}

impl<'a> View<'a> {
	pub fn width(&self) -> usize {
		self.plane.width
	}

	pub fn height(&self) -> usize {
		self.plane.height
	}

	pub fn get(&self, x: usize, y: usize) -> Option<Cell> {
		if x >= self.width() || y >= self.height() {
			return None;
		}
		self.plane.get(y + 1, x + 1)
	}

	pub fn rows(&self) -> impl Iterator<Item = &'a [Cell]> + 'a {
		let plane = self.plane;
		let width = plane.width;
		plane.cells
			.chunks(plane.stride())
			.skip(1)
			.take(plane.height)
			.map(move |row| &row[1..=width])
	}

	pub fn to_rows(&self) -> Vec<Vec<Cell>> {
		self.rows().map(|row| row.to_vec()).collect()
	}

	pub fn total(&self) -> u64 {
		self.rows().flatten().map(|&el| el as u64).sum()
	}
}

impl<'a> fmt::Display for View<'a> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let vis = [" ", ".", ":", "&"];
		let mut s = String::with_capacity((self.width() + 1) * self.height());
		for row in self.rows() {
			for &el in row {
				s += vis[el.min(3) as usize];
			}
			s += "\n";
		}
		write!(f, "{}", s)
	}
}

/// Steps until nothing changes and returns the number of passes that changed something.
pub fn run<E: UpdateEngine + ?Sized>(grid: &mut Grid, engine: &E) -> Result<u64> {
	let mut steps = 0;
	while grid.step(engine)? {
		steps += 1;
		trace!(steps, "\n{}", grid);
	}
	debug!(steps, grains = grid.total(), "stable");
	Ok(steps)
}

/// Writes the view as a PNG, one pixel per cell. Nothing is written if encoding fails.
pub fn png(view: &View, path: impl AsRef<Path>) -> Result<()> {
	let colors = [
		[0, 0, 0, 255],
		[64, 128, 0, 255],
		[118, 8, 170, 255],
		[255, 214, 0, 255],
	];
	let mut pixels = Vec::with_capacity(view.width() * view.height() * 4);
	for row in view.rows() {
		for &el in row {
			pixels.extend_from_slice(&colors[el.min(3) as usize]);
		}
	}
	let mut encoded = Vec::new();
	repng::encode(&mut encoded, view.width() as u32, view.height() as u32, &pixels)?;
	let path = path.as_ref();
	if let Err(e) = fs::write(path, &encoded) {
		if let Err(cleanup) = fs::remove_file(path) {
			debug!(path = %path.display(), error = %cleanup, "partial image not removed");
		}
		return Err(e.into());
	}
	debug!(path = %path.display(), bytes = encoded.len(), "image written");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn spike() -> Grid {
		let mut rows = vec![vec![0; 5]; 5];
		rows[2][2] = 4;
		Grid::new(5, 5, &rows).unwrap()
	}

	#[test]
	fn create_copies_values_inside_border() {
		let grid = Grid::new(3, 2, &[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
		assert_eq!(grid.snapshot().to_rows(), vec![vec![1, 2, 3], vec![4, 5, 6]]);
		let plane = &grid.src;
		for col in 0..plane.stride() {
			assert_eq!(plane.get(0, col), Some(0));
			assert_eq!(plane.get(3, col), Some(0));
		}
		for row in 0..4 {
			assert_eq!(plane.get(row, 0), Some(0));
			assert_eq!(plane.get(row, 4), Some(0));
		}
	}

	#[test]
	fn create_rejects_mismatched_values() {
		assert!(matches!(Grid::new(3, 2, &[vec![1, 2, 3]]), Err(Error::InvalidInput(_))));
		assert!(matches!(Grid::new(3, 2, &[vec![1, 2, 3], vec![1, 2]]), Err(Error::InvalidInput(_))));
		assert!(matches!(Grid::new(0, 0, &[]), Err(Error::InvalidInput(_))));
		assert!(matches!(Grid::from_rows(&[]), Err(Error::InvalidInput(_))));
	}

	#[test]
	fn huge_claimed_size_is_invalid_input() {
		assert!(matches!(Grid::new(usize::MAX, 1, &[vec![0]]), Err(Error::InvalidInput(_))));
		assert!(matches!(Grid::new(1, usize::MAX, &[vec![0]]), Err(Error::InvalidInput(_))));
		assert!(matches!(Grid::new(4_000_000_000, 4_000_000_000, &[]), Err(Error::InvalidInput(_))));
		assert!(matches!(Plane::with_interior(usize::MAX - 1, 0, &[]), Err(Error::InvalidInput(_))));
	}

	#[test]
	fn topple_rule() {
		assert_eq!(topple(4, 0, 0, 0, 0), 0);
		assert_eq!(topple(7, 4, 8, 3, 12), 3 + 1 + 2 + 0 + 3);
		assert_eq!(topple(Cell::MAX, Cell::MAX, Cell::MAX, Cell::MAX, Cell::MAX), 3 + 4 * (Cell::MAX / 4));
	}

	#[test]
	fn spike_topples_once() {
		let mut grid = spike();
		assert!(grid.step(&SequentialEngine).unwrap());
		let mut expected = vec![vec![0; 5]; 5];
		expected[1][2] = 1;
		expected[3][2] = 1;
		expected[2][1] = 1;
		expected[2][3] = 1;
		assert_eq!(grid.snapshot().to_rows(), expected);
		assert!(!grid.step(&SequentialEngine).unwrap());
		assert_eq!(grid.snapshot().to_rows(), expected);
	}

	#[test]
	fn region_splits() {
		let r = Region::new(1, 6, 1, 4);
		assert_eq!(r.area(), 15);
		let (top, bottom) = r.split_rows(2);
		assert_eq!(top, Region::new(1, 3, 1, 4));
		assert_eq!(bottom, Region::new(3, 6, 1, 4));
		let (left, right) = r.split_cols(1);
		assert_eq!(left.area() + right.area(), r.area());
		assert!(r.contains(&left) && r.contains(&right));
		assert!(!left.contains(&r));
	}

	#[test]
	fn view_access() {
		let grid = Grid::from_rows(&[vec![0, 1], vec![2, 3], vec![9, 5]]).unwrap();
		let view = grid.snapshot();
		assert_eq!((view.width(), view.height()), (2, 3));
		assert_eq!(view.get(1, 0), Some(1));
		assert_eq!(view.get(0, 2), Some(9));
		assert_eq!(view.get(2, 0), None);
		assert_eq!(view.get(0, 3), None);
		assert_eq!(view.total(), 20);
		assert_eq!(format!("{}", grid), " .\n:&\n&&\n");
	}

	#[test]
	fn png_writes_image() {
		let path = std::env::temp_dir().join(format!("sandpile-unit-{}.png", std::process::id()));
		png(&spike().snapshot(), &path).unwrap();
		let bytes = fs::read(&path).unwrap();
		assert_eq!(&bytes[1..4], b"PNG");
		fs::remove_file(&path).unwrap();
	}

	#[test]
	fn png_reports_unwritable_target() {
		let path = std::env::temp_dir().join("sandpile-no-such-dir").join("out.png");
		assert!(matches!(png(&spike().snapshot(), &path), Err(Error::Io(_))));
		assert!(!path.exists());
	}
}
