//! Display sink adapter (spec.md §6 / SPEC_FULL.md §4.7).
//!
//! `DisplaySink` decouples the core loop from presentation. `Sdl2Sink` is
//! grounded on the teacher's `nes.rs::run` window/canvas/texture-streaming
//! loop, narrowed to the Game Boy's 160x144 frame and four-shade palette.

use anyhow::{Context, Result};
use log::info;
use sdl2::{
    event::Event,
    keyboard::Keycode,
    pixels::PixelFormatEnum,
    render::{Canvas, TextureCreator},
    video::{Window, WindowContext},
    EventPump, Sdl,
};

use crate::joypad::JoypadState;
use crate::ppu::{DEFAULT_RGBA, SCREEN_HEIGHT, SCREEN_WIDTH};

/// Receives one rendered frame per call. Returning `false` requests the
/// core loop shut down (the player closed the window or asked to quit).
pub trait DisplaySink {
    fn present(&mut self, frame: &[u8; SCREEN_WIDTH * SCREEN_HEIGHT]) -> bool;

    /// Current joypad state, sampled once per frame after `present`.
    fn joypad(&self) -> JoypadState {
        JoypadState::default()
    }
}

/// No-op sink used by `--headless` runs: always accepts the frame, never
/// requests shutdown on its own (the caller bounds frame count instead).
pub struct NullSink;

impl DisplaySink for NullSink {
    fn present(&mut self, _frame: &[u8; SCREEN_WIDTH * SCREEN_HEIGHT]) -> bool {
        true
    }
}

/// Bundled SDL2 window sink.
pub struct Sdl2Sink {
    _sdl_context: Sdl,
    event_pump: EventPump,
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    joypad: JoypadState,
    rgb_frame: Vec<u8>,
}

impl Sdl2Sink {
    pub fn new(scale: u32) -> Result<Self> {
        let sdl_context = sdl2::init().map_err(|e| anyhow::anyhow!("Failed to initialize SDL2: {}", e))?;
        let video_subsystem = sdl_context
            .video()
            .map_err(|e| anyhow::anyhow!("Failed to initialize SDL2 video subsystem: {}", e))?;

        let window = video_subsystem
            .window(
                "rustyboy",
                SCREEN_WIDTH as u32 * scale,
                SCREEN_HEIGHT as u32 * scale,
            )
            .position_centered()
            .build()
            .with_context(|| "Failed to create window")?;

        let canvas = window
            .into_canvas()
            .accelerated()
            .present_vsync()
            .build()
            .with_context(|| "Failed to create canvas")?;

        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context
            .event_pump()
            .map_err(|e| anyhow::anyhow!("Failed to get event pump: {}", e))?;

        info!("SDL2 window opened at {}x scale", scale);

        Ok(Sdl2Sink {
            _sdl_context: sdl_context,
            event_pump,
            canvas,
            texture_creator,
            joypad: JoypadState::new(),
            rgb_frame: vec![0u8; SCREEN_WIDTH * SCREEN_HEIGHT * 3],
        })
    }

    fn handle_key(&mut self, key: Keycode, pressed: bool) {
        match key {
            Keycode::Up => self.joypad.up = pressed,
            Keycode::Down => self.joypad.down = pressed,
            Keycode::Left => self.joypad.left = pressed,
            Keycode::Right => self.joypad.right = pressed,
            Keycode::Z => self.joypad.a = pressed,
            Keycode::X => self.joypad.b = pressed,
            Keycode::Return => self.joypad.start = pressed,
            Keycode::RShift => self.joypad.select = pressed,
            _ => {}
        }
    }
}

impl DisplaySink for Sdl2Sink {
    fn present(&mut self, frame: &[u8; SCREEN_WIDTH * SCREEN_HEIGHT]) -> bool {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. } | Event::KeyDown { keycode: Some(Keycode::Escape), .. } => return false,
                Event::KeyDown { keycode: Some(key), .. } => self.handle_key(key, true),
                Event::KeyUp { keycode: Some(key), .. } => self.handle_key(key, false),
                _ => {}
            }
        }

        for (i, &shade) in frame.iter().enumerate() {
            let (r, g, b, _a) = DEFAULT_RGBA[shade as usize & 0x03];
            self.rgb_frame[i * 3] = r;
            self.rgb_frame[i * 3 + 1] = g;
            self.rgb_frame[i * 3 + 2] = b;
        }

        let result = (|| -> Result<()> {
            let mut texture = self
                .texture_creator
                .create_texture_streaming(PixelFormatEnum::RGB24, SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32)
                .with_context(|| "Failed to create texture")?;
            texture
                .update(None, &self.rgb_frame, SCREEN_WIDTH * 3)
                .with_context(|| "Failed to update texture")?;
            self.canvas
                .copy(&texture, None, None)
                .map_err(|e| anyhow::anyhow!("Failed to copy texture to canvas: {}", e))?;
            self.canvas.present();
            Ok(())
        })();

        result.is_ok()
    }

    fn joypad(&self) -> JoypadState {
        self.joypad
    }
}
