//! Headless display pane: a character grid behind the display contract.
//!
//! Accepts `Draw:text` (str1 at x, y), `pane-clear` and `text-size`;
//! the runtime snapshots the grid after each refresh. Stands in for a
//! terminal back-end so the kernel can be driven end to end without one.

use core_pane::{CallInfo, CommandHandle, Editor, pane_data};
use core_proto::{CallError, CmdRet, PaneId, keys};

pub struct Grid {
    pub w: usize,
    pub h: usize,
    cells: Vec<char>,
}

impl Grid {
    fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            cells: vec![' '; w * h],
        }
    }

    fn clear(&mut self) {
        self.cells.fill(' ');
    }

    fn resize(&mut self, w: usize, h: usize) {
        self.w = w;
        self.h = h;
        self.cells = vec![' '; w * h];
    }

    fn draw(&mut self, x: i32, y: i32, text: &str) {
        if y < 0 || y as usize >= self.h {
            return;
        }
        let row = y as usize;
        let mut col = x;
        for ch in text.chars() {
            if col >= 0 && (col as usize) < self.w {
                self.cells[row * self.w + col as usize] = ch;
            }
            col += 1;
        }
    }

    pub fn row(&self, y: usize) -> String {
        self.cells[y * self.w..(y + 1) * self.w].iter().collect()
    }

    /// Rows joined by newlines, right-trimmed.
    pub fn snapshot(&self) -> String {
        (0..self.h)
            .map(|y| self.row(y).trim_end().to_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Install the display pane under `parent` at the given size.
pub fn register_display_pane(
    ed: &mut Editor,
    parent: PaneId,
    w: usize,
    h: usize,
) -> anyhow::Result<PaneId> {
    let handler = CommandHandle::new("display:grid", display_dispatch);
    let id = ed
        .register(parent, 0, Some(handler), Some(pane_data(Grid::new(w, h))))
        .map_err(|e| anyhow::anyhow!("display pane registration failed: {e}"))?;
    ed.resize(id, 0, 0, w as i32, h as i32);
    Ok(id)
}

/// Snapshot of the display's current contents.
pub fn display_snapshot(ed: &Editor, display: PaneId) -> Option<String> {
    ed.data::<Grid>(display).map(|g| g.borrow().snapshot())
}

fn display_dispatch(ed: &mut Editor, ci: &mut CallInfo) -> core_proto::CallResult {
    let home = ci.require_home()?;
    let Some(grid) = ed.data::<Grid>(home) else {
        return Err(CallError::Invalid("not a display pane"));
    };
    match ci.key.as_str() {
        keys::DRAW_TEXT => {
            let text = ci.require_str()?;
            let (x, y) = (ci.x.unwrap_or(0), ci.y.unwrap_or(0));
            grid.borrow_mut().draw(x, y, text);
            Ok(CmdRet::ok())
        }
        keys::PANE_CLEAR => {
            grid.borrow_mut().clear();
            Ok(CmdRet::ok())
        }
        keys::TEXT_SIZE => {
            let text = ci.require_str()?;
            Ok(CmdRet::Num(text.chars().count().max(1) as i32))
        }
        keys::REFRESH_SIZE => {
            let (w, h) = {
                let p = ed.pane(home).ok_or(CallError::Invalid("home"))?;
                let (_, _, w, h) = p.geometry();
                (w.max(1) as usize, h.max(1) as usize)
            };
            let mut g = grid.borrow_mut();
            if (g.w, g.h) != (w, h) {
                g.resize(w, h);
            }
            // Children still follow the default fit-to-parent path.
            Ok(CmdRet::False)
        }
        _ => Ok(CmdRet::Fallthrough),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn draw_clips_to_grid() {
        let mut g = Grid::new(8, 2);
        g.draw(6, 0, "abc");
        g.draw(-1, 1, "xy");
        g.draw(0, 5, "nope");
        assert_eq!(g.row(0), "      ab");
        assert_eq!(g.row(1), "y       ");
    }

    #[test]
    fn snapshot_trims_rows() {
        let mut g = Grid::new(5, 2);
        g.draw(0, 0, "hi");
        assert_eq!(g.snapshot(), "hi\n");
    }
}
