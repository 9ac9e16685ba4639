//! CoreAudio host
//!
//! Thin `AudioHost` over the HAL object property API and the default output
//! audio unit. The refcon handed to CoreAudio is the dispatch token itself,
//! widened to a pointer; it is never dereferenced.

use std::mem;
use std::os::raw::c_void;
use std::ptr;
use std::slice;

use core_foundation::base::TCFType;
use core_foundation::string::{CFString, CFStringRef};
use coreaudio_sys::{
    kAudioDevicePropertyDataSource, kAudioDevicePropertyDataSourceNameForIDCFString,
    kAudioDevicePropertyDeviceNameCFString, kAudioDevicePropertyScopeInput,
    kAudioDevicePropertyScopeOutput, kAudioDevicePropertyStreams, kAudioFormatLinearPCM,
    kAudioHardwarePropertyDefaultInputDevice, kAudioHardwarePropertyDefaultOutputDevice,
    kAudioHardwarePropertyDevices, kAudioObjectPropertyElementMaster,
    kAudioObjectPropertyScopeGlobal, kAudioObjectSystemObject, kAudioUnitManufacturer_Apple,
    kAudioUnitProperty_SetRenderCallback, kAudioUnitProperty_StreamFormat, kAudioUnitScope_Input,
    kAudioUnitSubType_DefaultOutput, kAudioUnitType_Output, AURenderCallbackStruct, AudioBuffer,
    AudioBufferList, AudioComponentDescription, AudioComponentFindNext,
    AudioComponentInstanceDispose, AudioComponentInstanceNew, AudioDeviceID, AudioObjectAddPropertyListener,
    AudioObjectGetPropertyData, AudioObjectGetPropertyDataSize, AudioObjectID,
    AudioObjectPropertyAddress, AudioObjectRemovePropertyListener, AudioObjectSetPropertyData,
    AudioOutputUnitStart, AudioOutputUnitStop, AudioStreamBasicDescription, AudioStreamID,
    AudioTimeStamp, AudioUnit, AudioUnitInitialize, AudioUnitRenderActionFlags,
    AudioUnitSetProperty, AudioUnitUninitialize, AudioValueTranslation, OSStatus,
};
use tracing::debug;

use super::{AudioHost, HostProperty, HostStatus, UnitHandle, INVALID_PARAMETER, NO_ERROR, UNSPECIFIED_ERROR};
use crate::audio::dispatch;
use crate::audio::types::{DeviceId, Scope, StreamDescription};

type HostResult<T> = std::result::Result<T, HostStatus>;

/// Native host backed by the CoreAudio HAL
#[derive(Debug, Default)]
pub struct CoreAudioHost;

impl CoreAudioHost {
    pub fn new() -> Self {
        CoreAudioHost
    }
}

fn check(status: OSStatus) -> HostResult<()> {
    if status == NO_ERROR {
        Ok(())
    } else {
        Err(status)
    }
}

fn address(selector: u32, scope: u32) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: selector,
        mScope: scope,
        mElement: kAudioObjectPropertyElementMaster,
    }
}

fn device_scope(scope: Scope) -> u32 {
    match scope {
        Scope::Input => kAudioDevicePropertyScopeInput,
        Scope::Output => kAudioDevicePropertyScopeOutput,
    }
}

fn selector_for(property: HostProperty) -> u32 {
    match property {
        HostProperty::Devices => kAudioHardwarePropertyDevices,
        HostProperty::DefaultInputDevice => kAudioHardwarePropertyDefaultInputDevice,
        HostProperty::DefaultOutputDevice => kAudioHardwarePropertyDefaultOutputDevice,
    }
}

fn property_for(selector: u32) -> Option<HostProperty> {
    [
        HostProperty::Devices,
        HostProperty::DefaultInputDevice,
        HostProperty::DefaultOutputDevice,
    ]
    .into_iter()
    .find(|p| selector_for(*p) == selector)
}

fn default_selector(scope: Scope) -> u32 {
    selector_for(HostProperty::default_device(scope))
}

/// Read a fixed-size property value
fn get_value<T: Copy>(object: AudioObjectID, address: &AudioObjectPropertyAddress, value: &mut T) -> HostResult<()> {
    let mut size = mem::size_of::<T>() as u32;
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            address as *const _,
            0,
            ptr::null(),
            &mut size as *mut _,
            value as *mut T as *mut c_void,
        )
    };
    check(status)
}

fn data_size(object: AudioObjectID, address: &AudioObjectPropertyAddress) -> HostResult<u32> {
    let mut size: u32 = 0;
    let status = unsafe {
        AudioObjectGetPropertyDataSize(object, address as *const _, 0, ptr::null(), &mut size as *mut _)
    };
    check(status)?;
    Ok(size)
}

fn unit_ref(unit: UnitHandle) -> AudioUnit {
    unit.0 as usize as AudioUnit
}

impl AudioHost for CoreAudioHost {
    fn device_ids(&self) -> HostResult<Vec<DeviceId>> {
        let address = address(kAudioHardwarePropertyDevices, kAudioObjectPropertyScopeGlobal);
        let size = data_size(kAudioObjectSystemObject, &address)?;
        let count = size as usize / mem::size_of::<AudioDeviceID>();
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ids: Vec<AudioDeviceID> = vec![0; count];
        let mut actual = size;
        let status = unsafe {
            AudioObjectGetPropertyData(
                kAudioObjectSystemObject,
                &address as *const _,
                0,
                ptr::null(),
                &mut actual as *mut _,
                ids.as_mut_ptr() as *mut c_void,
            )
        };
        check(status)?;
        // The list may have shrunk between the two calls
        ids.truncate(actual as usize / mem::size_of::<AudioDeviceID>());
        Ok(ids.into_iter().map(DeviceId).collect())
    }

    fn stream_count(&self, device: DeviceId, scope: Scope) -> HostResult<u32> {
        let address = address(kAudioDevicePropertyStreams, device_scope(scope));
        let size = data_size(device.0, &address)?;
        Ok(size / mem::size_of::<AudioStreamID>() as u32)
    }

    fn device_name(&self, device: DeviceId) -> HostResult<String> {
        let address = address(kAudioDevicePropertyDeviceNameCFString, kAudioObjectPropertyScopeGlobal);
        let mut name: CFStringRef = ptr::null();
        get_value(device.0, &address, &mut name)?;
        if name.is_null() {
            return Ok(String::new());
        }
        // Copied property: we own the reference
        let name = unsafe { CFString::wrap_under_create_rule(name) };
        Ok(name.to_string())
    }

    fn default_device(&self, scope: Scope) -> HostResult<DeviceId> {
        let address = address(default_selector(scope), kAudioObjectPropertyScopeGlobal);
        let mut id: AudioDeviceID = 0;
        get_value(kAudioObjectSystemObject, &address, &mut id)?;
        Ok(DeviceId(id))
    }

    fn set_default_device(&self, device: DeviceId, scope: Scope) -> HostResult<()> {
        let address = address(default_selector(scope), kAudioObjectPropertyScopeGlobal);
        let id: AudioDeviceID = device.0;
        let status = unsafe {
            AudioObjectSetPropertyData(
                kAudioObjectSystemObject,
                &address as *const _,
                0,
                ptr::null(),
                mem::size_of::<AudioDeviceID>() as u32,
                &id as *const _ as *const c_void,
            )
        };
        check(status)
    }

    fn data_source(&self, device: DeviceId, scope: Scope) -> HostResult<u32> {
        let address = address(kAudioDevicePropertyDataSource, device_scope(scope));
        let mut source: u32 = 0;
        get_value(device.0, &address, &mut source)?;
        Ok(source)
    }

    fn data_source_name(&self, device: DeviceId, scope: Scope, source: u32) -> HostResult<String> {
        let address = address(kAudioDevicePropertyDataSourceNameForIDCFString, device_scope(scope));
        let mut source = source;
        let mut name: CFStringRef = ptr::null();
        let mut translation = AudioValueTranslation {
            mInputData: &mut source as *mut u32 as *mut c_void,
            mInputDataSize: mem::size_of::<u32>() as u32,
            mOutputData: &mut name as *mut CFStringRef as *mut c_void,
            mOutputDataSize: mem::size_of::<CFStringRef>() as u32,
        };
        get_value(device.0, &address, &mut translation)?;
        if name.is_null() {
            return Ok(String::new());
        }
        let name = unsafe { CFString::wrap_under_create_rule(name) };
        Ok(name.to_string())
    }

    fn add_property_listener(&self, property: HostProperty, token: u64) -> HostResult<()> {
        let address = address(selector_for(property), kAudioObjectPropertyScopeGlobal);
        let status = unsafe {
            AudioObjectAddPropertyListener(
                kAudioObjectSystemObject,
                &address,
                Some(listener_trampoline),
                token as usize as *mut c_void,
            )
        };
        check(status)
    }

    fn remove_property_listener(&self, property: HostProperty, token: u64) -> HostResult<()> {
        let address = address(selector_for(property), kAudioObjectPropertyScopeGlobal);
        let status = unsafe {
            AudioObjectRemovePropertyListener(
                kAudioObjectSystemObject,
                &address,
                Some(listener_trampoline),
                token as usize as *mut c_void,
            )
        };
        check(status)
    }

    fn new_default_output_unit(&self) -> HostResult<UnitHandle> {
        let description = AudioComponentDescription {
            componentType: kAudioUnitType_Output,
            componentSubType: kAudioUnitSubType_DefaultOutput,
            componentManufacturer: kAudioUnitManufacturer_Apple,
            componentFlags: 0,
            componentFlagsMask: 0,
        };

        let component = unsafe { AudioComponentFindNext(ptr::null_mut(), &description) };
        if component.is_null() {
            return Err(UNSPECIFIED_ERROR);
        }

        let mut unit: AudioUnit = ptr::null_mut();
        check(unsafe { AudioComponentInstanceNew(component, &mut unit) })?;
        if unit.is_null() {
            return Err(UNSPECIFIED_ERROR);
        }
        debug!("Created default output unit {:p}", unit);
        Ok(UnitHandle(unit as usize as u64))
    }

    fn set_stream_format(&self, unit: UnitHandle, bus: u32, description: &StreamDescription) -> HostResult<()> {
        let asbd = AudioStreamBasicDescription {
            mSampleRate: description.sample_rate,
            mFormatID: kAudioFormatLinearPCM,
            mFormatFlags: description.format_flags.0,
            mBytesPerPacket: description.bytes_per_packet,
            mFramesPerPacket: description.frames_per_packet,
            mBytesPerFrame: description.bytes_per_frame,
            mChannelsPerFrame: description.channels_per_frame,
            mBitsPerChannel: description.bits_per_channel,
            mReserved: 0,
        };
        let status = unsafe {
            AudioUnitSetProperty(
                unit_ref(unit),
                kAudioUnitProperty_StreamFormat,
                kAudioUnitScope_Input,
                bus,
                &asbd as *const _ as *const c_void,
                mem::size_of::<AudioStreamBasicDescription>() as u32,
            )
        };
        check(status)
    }

    fn set_render_callback(&self, unit: UnitHandle, bus: u32, token: u64) -> HostResult<()> {
        let callback = AURenderCallbackStruct {
            inputProc: Some(render_trampoline),
            inputProcRefCon: token as usize as *mut c_void,
        };
        let status = unsafe {
            AudioUnitSetProperty(
                unit_ref(unit),
                kAudioUnitProperty_SetRenderCallback,
                kAudioUnitScope_Input,
                bus,
                &callback as *const _ as *const c_void,
                mem::size_of::<AURenderCallbackStruct>() as u32,
            )
        };
        check(status)
    }

    fn initialize_unit(&self, unit: UnitHandle) -> HostResult<()> {
        check(unsafe { AudioUnitInitialize(unit_ref(unit)) })
    }

    fn start_unit(&self, unit: UnitHandle) -> HostResult<()> {
        check(unsafe { AudioOutputUnitStart(unit_ref(unit)) })
    }

    fn stop_unit(&self, unit: UnitHandle) -> HostResult<()> {
        check(unsafe { AudioOutputUnitStop(unit_ref(unit)) })
    }

    fn uninitialize_unit(&self, unit: UnitHandle) -> HostResult<()> {
        check(unsafe { AudioUnitUninitialize(unit_ref(unit)) })
    }

    fn dispose_unit(&self, unit: UnitHandle) -> HostResult<()> {
        check(unsafe { AudioComponentInstanceDispose(unit_ref(unit)) })
    }

    fn name(&self) -> &'static str {
        "CoreAudio"
    }
}

unsafe fn buffer_bytes<'a>(buffer: &'a mut AudioBuffer) -> &'a mut [u8] {
    if buffer.mData.is_null() {
        return &mut [];
    }
    slice::from_raw_parts_mut(buffer.mData as *mut u8, buffer.mDataByteSize as usize)
}

/// Render proc registered with every output unit
extern "C" fn render_trampoline(
    in_ref_con: *mut c_void,
    _io_action_flags: *mut AudioUnitRenderActionFlags,
    _in_time_stamp: *const AudioTimeStamp,
    in_bus_number: u32,
    in_number_frames: u32,
    io_data: *mut AudioBufferList,
) -> OSStatus {
    let token = in_ref_con as usize as u64;
    if io_data.is_null() {
        return dispatch::render_entry(token, in_bus_number, in_number_frames, &mut []);
    }

    let list = unsafe { &mut *io_data };
    let buffers = unsafe { slice::from_raw_parts_mut(list.mBuffers.as_mut_ptr(), list.mNumberBuffers as usize) };

    // No allocation on this thread: only the single-buffer layout is forwarded
    match buffers {
        [only] => {
            let data = unsafe { buffer_bytes(only) };
            dispatch::render_entry(token, in_bus_number, in_number_frames, &mut [data])
        }
        others => {
            for buffer in others.iter_mut() {
                unsafe { buffer_bytes(buffer) }.fill(0);
            }
            let status = dispatch::render_entry(token, in_bus_number, in_number_frames, &mut []);
            if status == NO_ERROR {
                INVALID_PARAMETER
            } else {
                status
            }
        }
    }
}

/// Property listener proc registered for every subscription
extern "C" fn listener_trampoline(
    in_object_id: AudioObjectID,
    in_number_addresses: u32,
    in_addresses: *const AudioObjectPropertyAddress,
    in_client_data: *mut c_void,
) -> OSStatus {
    if in_addresses.is_null() || in_number_addresses == 0 {
        return NO_ERROR;
    }
    let addresses = unsafe { slice::from_raw_parts(in_addresses, in_number_addresses as usize) };
    let properties: Vec<HostProperty> = addresses
        .iter()
        .filter_map(|a| property_for(a.mSelector))
        .collect();

    dispatch::listener_entry(in_object_id, &properties, in_client_data as usize as u64);
    NO_ERROR
}
