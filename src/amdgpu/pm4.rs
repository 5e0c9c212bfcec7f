//! PM4 (GFX/compute) and SDMA packet encodings.

#![allow(clippy::cast_possible_truncation)]

// ===============================================================================================
// PM4 type-3 packets
// ===============================================================================================

pub const PACKET_TYPE3: u32 = 3;

#[must_use]
pub const fn packet3(op: u32, n: u32) -> u32 {
    (PACKET_TYPE3 << 30) | ((n & 0x3FFF) << 16) | ((op & 0xFF) << 8)
}

/// Type-3 header with the shader-type bit set for the compute pipe.
#[must_use]
pub const fn packet3_compute(op: u32, n: u32) -> u32 {
    packet3(op, n) | (1 << 1)
}

/// Filler dword accepted by both GFX and compute rings.
pub const GFX_COMPUTE_NOP: u32 = 0xffff_1000;

pub const PACKET3_NOP: u32 = 0x10;
pub const PACKET3_ATOMIC_MEM: u32 = 0x1E;
pub const PACKET3_DISPATCH_DIRECT: u32 = 0x15;
pub const PACKET3_CONTEXT_CONTROL: u32 = 0x28;
pub const PACKET3_WRITE_DATA: u32 = 0x37;
pub const PACKET3_WAIT_REG_MEM: u32 = 0x3C;
pub const PACKET3_DMA_DATA: u32 = 0x50;
pub const PACKET3_DMA_DATA_SI: u32 = 0x41;
pub const PACKET3_SET_SH_REG: u32 = 0x76;
pub const PACKET3_SET_UCONFIG_REG: u32 = 0x79;
pub const PACKET3_SET_SH_REG_INDEX: u32 = 0x9B;

/// Persistent SH register space starts here; `SET_SH_REG` takes offsets from it.
pub const SH_REG_BASE: u32 = 0x2c00;

// WRITE_DATA
#[must_use]
pub const fn write_data_dst_sel(x: u32) -> u32 {
    x << 8
}
pub const WRITE_DATA_DST_SEL_MEM_ASYNC: u32 = 5;
pub const WR_CONFIRM: u32 = 1 << 20;

// DMA_DATA
#[must_use]
pub const fn dma_data_engine(x: u32) -> u32 {
    x
}
#[must_use]
pub const fn dma_data_dst_sel(x: u32) -> u32 {
    x << 20
}
#[must_use]
pub const fn dma_data_src_sel(x: u32) -> u32 {
    x << 29
}
pub const DMA_DATA_CP_SYNC: u32 = 1 << 31;

// DMA_DATA, SI layout
#[must_use]
pub const fn dma_data_si_engine(x: u32) -> u32 {
    x << 27
}
#[must_use]
pub const fn dma_data_si_dst_sel(x: u32) -> u32 {
    x << 20
}
#[must_use]
pub const fn dma_data_si_src_sel(x: u32) -> u32 {
    x << 29
}
pub const DMA_DATA_SI_CP_SYNC: u32 = 1 << 31;

// ATOMIC_MEM
#[must_use]
pub const fn atomic_mem_command(x: u32) -> u32 {
    x << 8
}
#[must_use]
pub const fn atomic_mem_cache_policy(x: u32) -> u32 {
    x << 25
}
#[must_use]
pub const fn atomic_mem_engine_sel(x: u32) -> u32 {
    x << 30
}
pub const TC_OP_ATOMIC_CMPSWAP_RTN_32: u32 = 8;

// WAIT_REG_MEM
#[must_use]
pub const fn wait_reg_mem_function(x: u32) -> u32 {
    x
}
#[must_use]
pub const fn wait_reg_mem_mem_space(x: u32) -> u32 {
    x << 4
}
#[must_use]
pub const fn wait_reg_mem_operation(x: u32) -> u32 {
    x << 6
}
#[must_use]
pub const fn wait_reg_mem_engine(x: u32) -> u32 {
    x << 8
}
/// `==` compare function.
pub const WAIT_REG_MEM_FUNC_EQUAL: u32 = 3;

// ===============================================================================================
// SDMA packets
// ===============================================================================================

#[must_use]
pub const fn sdma_packet(op: u32, sub_op: u32, extra: u32) -> u32 {
    ((extra & 0xFFFF) << 16) | ((sub_op & 0xFF) << 8) | (op & 0xFF)
}

pub const SDMA_OPCODE_NOP: u32 = 0;
pub const SDMA_OPCODE_COPY: u32 = 1;
pub const SDMA_OPCODE_WRITE: u32 = 2;
pub const SDMA_OPCODE_POLL_REGMEM: u32 = 8;
pub const SDMA_OPCODE_ATOMIC: u32 = 10;
pub const SDMA_OPCODE_CONSTANT_FILL: u32 = 11;

pub const SDMA_COPY_SUB_OPCODE_LINEAR: u32 = 0;
pub const SDMA_WRITE_SUB_OPCODE_LINEAR: u32 = 0;

pub const SDMA_NOP: u32 = sdma_packet(SDMA_OPCODE_NOP, 0, 0);

#[must_use]
pub const fn sdma_atomic_loop(x: u32) -> u32 {
    x
}
#[must_use]
pub const fn sdma_atomic_tmz(x: u32) -> u32 {
    x << 2
}
#[must_use]
pub const fn sdma_atomic_opcode(x: u32) -> u32 {
    x << 9
}

#[must_use]
pub const fn sdma_constant_fill_extra_size(x: u32) -> u32 {
    x << 14
}

#[must_use]
pub const fn sdma_poll_regmem_extra_op(x: u32) -> u32 {
    x << 10
}
#[must_use]
pub const fn sdma_poll_regmem_extra_func(x: u32) -> u32 {
    x << 12
}
pub const SDMA_POLL_REGMEM_EXTRA_M: u32 = 1 << 15;
#[must_use]
pub const fn sdma_poll_regmem_dw5_interval(x: u32) -> u32 {
    x
}
#[must_use]
pub const fn sdma_poll_regmem_dw5_retry_count(x: u32) -> u32 {
    x << 16
}

// SI DMA engine
#[must_use]
pub const fn sdma_packet_si(op: u32, b: u32, t: u32, s: u32, cnt: u32) -> u32 {
    ((op & 0xF) << 28) | ((b & 0x1) << 26) | ((t & 0x1) << 23) | ((s & 0x1) << 22) | (cnt & 0xFFFFF)
}

pub const SDMA_OPCODE_WRITE_SI: u32 = 2;
pub const SDMA_OPCODE_COPY_SI: u32 = 3;
pub const SDMA_OPCODE_CONSTANT_FILL_SI: u32 = 13;
pub const SDMA_NOP_SI: u32 = 0xf000_0000;
