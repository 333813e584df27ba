use ch32_metapac::dma::{vals, Channel, Dma as Regs};

/// All 7 channels of a DMA peripheral, each constructed once.
pub struct Dma {
    pub c1: DmaChannel,
    pub c2: DmaChannel,
    pub c3: DmaChannel,
    pub c4: DmaChannel,
    pub c5: DmaChannel,
    pub c6: DmaChannel,
    pub c7: DmaChannel,
}

impl Dma {
    pub fn new(dma: Regs) -> Self {
        Self {
            c1: DmaChannel::new(dma, 0),
            c2: DmaChannel::new(dma, 1),
            c3: DmaChannel::new(dma, 2),
            c4: DmaChannel::new(dma, 3),
            c5: DmaChannel::new(dma, 4),
            c6: DmaChannel::new(dma, 5),
            c7: DmaChannel::new(dma, 6),
        }
    }
}

/// Driver for controlling a DMA channel.
pub struct DmaChannel {
    dma: Regs,
    /// Channel index, 0 for channel 1.
    idx: usize,
}

impl DmaChannel {
    fn new(dma: Regs, idx: usize) -> DmaChannel {
        DmaChannel { dma, idx }
    }

    fn ch(&self) -> Channel {
        self.dma.ch(self.idx)
    }

    /// Set up this channel for transmit (memory-to-peripheral) operation.
    /// Configures 8-bit reads and writes, increments memory, and raises
    /// an interrupt on completion.
    pub fn setup_tx(&self, paddr: u32) {
        self.stop();
        self.ch().cfgr().write(|w| {
            w.set_dir(vals::Dir::FROM_MEMORY);
            w.set_minc(true);
            w.set_psize(vals::Size::BITS8);
            w.set_msize(vals::Size::BITS8);
            w.set_pl(vals::Pl::VERY_HIGH);
            w.set_tcie(true);
        });
        self.ch().paddr().write_value(paddr);
    }

    /// Set up this channel to write bytes as zero-extended words to a
    /// peripheral register, such as a GPIO output register. No interrupt.
    pub fn setup_tx_word(&self, paddr: u32) {
        self.stop();
        self.ch().cfgr().write(|w| {
            w.set_dir(vals::Dir::FROM_MEMORY);
            w.set_minc(true);
            w.set_psize(vals::Size::BITS32);
            w.set_msize(vals::Size::BITS8);
            w.set_pl(vals::Pl::VERY_HIGH);
        });
        self.ch().paddr().write_value(paddr);
    }

    /// Start this channel for transmit (memory-to-peripheral) operation,
    /// using the provided slice's address and length.
    ///
    /// The slice must stay untouched until the transfer completes.
    pub fn start_tx(&self, data: &[u8]) {
        self.stop();
        self.clear_flags();
        self.ch().maddr().write_value(data.as_ptr() as u32);
        self.ch().cntr().write(|w| w.set_ndt(data.len() as u16));
        self.ch().cfgr().modify(|w| w.set_en(true));
    }

    /// Cancel any ongoing DMA transfer.
    pub fn stop(&self) {
        self.ch().cfgr().modify(|w| w.set_en(false));
    }

    /// Clear transfer-complete flag for this channel.
    pub fn clear_tcif(&self) {
        self.dma.intfcr().write(|w| w.set_ctcif(self.idx, true));
    }

    /// Clear all flags for this channel.
    pub fn clear_flags(&self) {
        self.dma.intfcr().write(|w| w.set_cgif(self.idx, true));
    }
}
