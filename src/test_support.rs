//! Scratch directories for tests that touch the filesystem.

use std::path::{Path, PathBuf};

pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(label: &str) -> Self {
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let mut path = std::env::temp_dir();
        path.push(format!(
            "roomstage_{}_{}_{}",
            label,
            std::process::id(),
            nonce
        ));
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Unit square in the XY plane, two triangles, red vertex colours.
pub const SQUARE_OBJ: &str = "o Square
v -0.5 -0.5 0 1 0 0
v 0.5 -0.5 0 1 0 0
v 0.5 0.5 0 1 0 0
v -0.5 0.5 0 1 0 0
f 1 2 3
f 1 3 4
";

/// Small coloured point cloud standing in for a room scan.
pub const ROOM_PLY: &str = "ply
format ascii 1.0
element vertex 4
property float x
property float y
property float z
property uchar red
property uchar green
property uchar blue
element face 2
property list uchar int vertex_indices
end_header
-2 3 -1 200 180 160
2 3 -1 200 180 160
2 3 2 120 110 100
-2 3 2 120 110 100
3 0 1 2
3 0 2 3
";
