//! ASCII camera preview with face boxes and a coloured status list.

use crate::session::{Annotation, FaceStatus};
use crossterm::style::{Color, Stylize};
use rollcall_core::Identity;
use crossterm::{cursor, queue, terminal};
use std::io::{self, Write};

const ASCII_RAMP: &[char] = &[' ', '.', '·', ':', ';', '+', '=', 'x', 'X', '#', '@'];
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;
/// Rows below the preview reserved for the status list and help line.
const STATUS_ROWS: usize = 6;
/// Frames a notice stays in the status area unless a key dismisses it.
const NOTICE_FRAMES: u32 = 150;

pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    /// Size from the terminal unless given explicitly.
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        Self::with_size(
            width.unwrap_or(term_width.min(DEFAULT_WIDTH)),
            height.unwrap_or(term_height.saturating_sub(STATUS_ROWS).min(DEFAULT_HEIGHT)),
        )
    }

    pub fn with_size(width: usize, height: usize) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Render a grayscale frame with a labelled box around every face.
    pub fn render(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
        faces: &[Annotation],
    ) -> Vec<String> {
        let mut grid = self.image_to_ascii(gray, width, height);
        for face in faces {
            self.draw_face(&mut grid, face, width as f32, height as f32);
        }
        grid.into_iter().map(|row| row.into_iter().collect()).collect()
    }

    fn image_to_ascii(&self, gray: &[u8], width: u32, height: u32) -> Vec<Vec<char>> {
        let mut grid = vec![vec![' '; self.width]; self.height];
        if width == 0 || height == 0 {
            return grid;
        }

        for (term_y, row) in grid.iter_mut().enumerate() {
            let img_y = term_y * height as usize / self.height;
            for (term_x, cell) in row.iter_mut().enumerate() {
                let img_x = term_x * width as usize / self.width;
                if let Some(&brightness) = gray.get(img_y * width as usize + img_x) {
                    *cell = ASCII_RAMP[brightness as usize * (ASCII_RAMP.len() - 1) / 255];
                }
            }
        }
        grid
    }

    fn draw_face(&self, grid: &mut [Vec<char>], face: &Annotation, img_w: f32, img_h: f32) {
        let bbox = &face.recognition.bbox;
        let scale_x = |x: f32| ((x.max(0.0) / img_w) * self.width as f32) as usize;
        let scale_y = |y: f32| ((y.max(0.0) / img_h) * self.height as f32) as usize;

        let x1 = scale_x(bbox.x).min(self.width - 1);
        let y1 = scale_y(bbox.y).min(self.height - 1);
        let x2 = scale_x(bbox.x + bbox.width).saturating_sub(1).clamp(x1, self.width - 1);
        let y2 = scale_y(bbox.y + bbox.height).saturating_sub(1).clamp(y1, self.height - 1);

        for x in x1..=x2 {
            grid[y1][x] = '─';
            grid[y2][x] = '─';
        }
        for row in grid.iter_mut().take(y2 + 1).skip(y1) {
            row[x1] = '│';
            row[x2] = '│';
        }
        grid[y1][x1] = '┌';
        grid[y1][x2] = '┐';
        grid[y2][x1] = '└';
        grid[y2][x2] = '┘';

        // Above the box, or below it when the box touches the top edge.
        let label_y = if y1 > 0 {
            y1 - 1
        } else if y2 + 1 < self.height {
            y2 + 1
        } else {
            (y1 + 1).min(y2)
        };
        for (i, ch) in face.identity.name.chars().enumerate() {
            let x = x1 + i;
            if x >= self.width {
                break;
            }
            grid[label_y][x] = ch;
        }
    }

    /// Redraw the preview and status list in place.
    pub fn draw(
        &self,
        out: &mut impl Write,
        gray: &[u8],
        width: u32,
        height: u32,
        faces: &[Annotation],
        present: usize,
        notice: Option<&Notice>,
    ) -> io::Result<()> {
        queue!(out, cursor::MoveTo(0, 0))?;
        for line in self.render(gray, width, height, faces) {
            queue!(out, terminal::Clear(terminal::ClearType::CurrentLine))?;
            write!(out, "{line}\r\n")?;
        }
        queue!(out, terminal::Clear(terminal::ClearType::FromCursorDown))?;
        for (line, color) in status_area(faces, present, notice) {
            match color {
                Some(color) => write!(out, "{}\r\n", line.with(color))?,
                None => write!(out, "{line}\r\n")?,
            }
        }
        out.flush()
    }
}

/// Text pinned in the status area for a while, such as an on-demand summary.
#[derive(Debug, Clone)]
pub struct Notice {
    lines: Vec<String>,
    frames_left: u32,
}

impl Notice {
    pub fn summary(people: &[Identity]) -> Self {
        let mut lines = vec![format!("{} present:", people.len())];
        lines.extend(people.iter().map(|p| format!("  {p}")));
        Self {
            lines,
            frames_left: NOTICE_FRAMES,
        }
    }

    /// Count one drawn frame. Returns false once the notice has expired.
    pub fn tick(&mut self) -> bool {
        self.frames_left = self.frames_left.saturating_sub(1);
        self.frames_left > 0
    }
}

/// Lines under the preview: the help line, then either the notice or one line per face.
pub fn status_area(
    faces: &[Annotation],
    present: usize,
    notice: Option<&Notice>,
) -> Vec<(String, Option<Color>)> {
    let rows = STATUS_ROWS - 1;
    let mut area = vec![(
        format!("present today: {present}   [q] quit  [r] reload  [s] summary"),
        None,
    )];

    match notice {
        Some(notice) if notice.lines.len() > rows => {
            let shown = rows - 1;
            area.extend(notice.lines[..shown].iter().map(|l| (l.clone(), None)));
            let hidden = notice.lines.len() - shown;
            area.push((format!("  ... and {hidden} more"), None));
        }
        Some(notice) => area.extend(notice.lines.iter().map(|l| (l.clone(), None))),
        None => area.extend(
            faces
                .iter()
                .take(rows)
                .map(|f| (status_line(f), Some(status_color(f.status)))),
        ),
    }
    area
}

pub fn status_color(status: FaceStatus) -> Color {
    match status {
        FaceStatus::Unknown => Color::Red,
        FaceStatus::Recognized => Color::Yellow,
        FaceStatus::Present => Color::Green,
    }
}

pub fn status_line(face: &Annotation) -> String {
    let state = match face.status {
        FaceStatus::Unknown => "unknown",
        FaceStatus::Recognized => "recognized",
        FaceStatus::Present => "present",
    };
    format!(
        "{:<8} {:<24} {:>6.1}  {state}",
        face.track.to_string(),
        face.identity.to_string(),
        face.recognition.confidence
    )
}

pub fn clear_screen() -> io::Result<()> {
    let mut out = io::stdout();
    queue!(out, terminal::Clear(terminal::ClearType::All), cursor::MoveTo(0, 0))?;
    out.flush()
}
