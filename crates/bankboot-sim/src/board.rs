//! Built-in demo board

use bankboot_core::layout::{BoardLayout, LayoutError};

/// Layout of the demo board: 1 MiB of flash, 4 KiB erase blocks
pub const DEMO_BOARD: &str = r#"
[device]
name = "demo"
size = "1 MiB"
erase_block = "4 KiB"
write_align = 4
erased_value = 0xFF

[capabilities]
encrypted_images = false
scratch_area = true

[[area]]
name = "bootloader"
id = 0
offset = 0x00000000
size = "48 KiB"

[[area]]
name = "image-0"
id = 1
offset = 0x0000C000
size = "416 KiB"

[[area]]
name = "image-1"
id = 2
offset = 0x00074000
size = "416 KiB"

[[area]]
name = "scratch"
id = 3
offset = 0x000DC000
size = "112 KiB"

[[area]]
name = "storage"
id = 4
offset = 0x000F8000
size = "32 KiB"
"#;

/// Parse [`DEMO_BOARD`]
pub fn demo_layout() -> Result<BoardLayout, LayoutError> {
    BoardLayout::from_toml_str(DEMO_BOARD)
}
