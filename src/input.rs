use super::*;

/// Reads a grid from a text file, see [`parse_grid`] for the format.
pub fn read_grid(path: impl AsRef<Path>) -> Result<Grid> {
	let text = fs::read_to_string(path)?;
	parse_grid(&text)
}

/// Parses `width,height` followed by `height` lines of `width` comma-separated grain counts.
///
/// Trailing blank lines are ignored.
pub fn parse_grid(text: &str) -> Result<Grid> {
	let mut lines = text.lines().enumerate();
	let (width, height) = match lines.next() {
		Some((_, header)) => parse_header(header)?,
		None => return Err(Error::InvalidInput("Empty input".to_owned())),
	};
	debug!(width, height, "parsed header");
	let mut rows = Vec::new();
	for (n, line) in lines {
		if rows.len() == height {
			if line.trim().is_empty() {
				continue;
			}
			return Err(Error::InvalidInput(format!("Line {}: expected only {} rows", n + 1, height)));
		}
		rows.push(parse_row(line, width, n + 1)?);
	}
	if rows.len() != height {
		return Err(Error::InvalidInput(format!("Expected {} rows, got {}", height, rows.len())));
	}
	Grid::new(width, height, &rows)
}

fn parse_header(line: &str) -> Result<(usize, usize)> {
	let dims: Vec<_> = line.split(',').map(str::trim).collect();
	if dims.len() != 2 {
		return Err(Error::InvalidInput(format!("Line 1: expected 'width,height', got '{}'", line.trim())));
	}
	match (dims[0].parse::<usize>(), dims[1].parse::<usize>()) {
		(Ok(x), Ok(y)) if x > 0 && y > 0 => Ok((x, y)),
		_ => Err(Error::InvalidInput(format!("Line 1: '{}' is not a valid grid size", line.trim()))),
	}
}

fn parse_row(line: &str, width: usize, n: usize) -> Result<Vec<Cell>> {
	let row = line.split(',')
		.enumerate()
		.map(|(j, s)| s.trim().parse::<Cell>().map_err(|_| Error::InvalidInput(
			format!("Line {}, column {}: '{}' is not a grain count", n, j + 1, s.trim()))))
		.collect::<Result<Vec<_>>>()?;
	if row.len() != width {
		return Err(Error::InvalidInput(format!("Line {}: expected {} values, got {}", n, width, row.len())));
	}
	Ok(row)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn invalid(text: &str) -> bool {
		matches!(parse_grid(text), Err(Error::InvalidInput(_)))
	}

	#[test]
	fn parses_rows_in_order() {
		let grid = parse_grid("3,2\n1,2,3\n4, 5 ,6\r\n\n").unwrap();
		assert_eq!((grid.width(), grid.height()), (3, 2));
		assert_eq!(grid.snapshot().to_rows(), vec![vec![1, 2, 3], vec![4, 5, 6]]);
	}

	#[test]
	fn rejects_bad_header() {
		assert!(invalid(""));
		assert!(invalid("3\n1,2,3\n"));
		assert!(invalid("3,2,1\n1,2,3\n"));
		assert!(invalid("three,2\n"));
		assert!(invalid("0,2\n"));
	}

	#[test]
	fn rejects_bad_rows() {
		assert!(invalid("3,2\n1,2,3\n"));
		assert!(invalid("3,2\n1,2,3\n4,5\n"));
		assert!(invalid("3,2\n1,2,3\n4,5,6,7\n"));
		assert!(invalid("3,2\n1,2,3\n4,-5,6\n"));
		assert!(invalid("3,2\n1,2,3\n4,x,6\n"));
		assert!(invalid("3,2\n1,2,3\n\n4,5,6\n"));
		assert!(invalid("3,2\n1,2,3\n4,5,6\n7,8,9\n"));
	}

	#[test]
	fn huge_header_is_rejected_without_allocating() {
		assert!(invalid("1,18446744073709551615\n0\n"));
		assert!(invalid("18446744073709551615,1\n0\n"));
		assert!(invalid("1,4000000000\n0\n"));
		assert!(invalid("18446744073709551616,1\n0\n"));
	}

	#[test]
	fn reports_line_numbers() {
		match parse_grid("2,2\n1,2\n3,oops\n") {
			Err(e) => assert_eq!(e.to_string(), "Invalid input: Line 3, column 2: 'oops' is not a grain count"),
			Ok(_) => panic!("parsed a non-integer token"),
		}
	}

	#[test]
	fn missing_file_is_io_error() {
		let path = std::env::temp_dir().join("sandpile-missing-input.csv");
		assert!(matches!(read_grid(path), Err(Error::Io(_))));
	}
}
